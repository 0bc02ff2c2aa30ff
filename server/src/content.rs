use crate::config::{QuestionSourceType, QuestionsConfig};
use crate::error::ContentError;
use crate::game_logic::QuestionPool;

/// One prompt per line. Blank lines and `#` comments are skipped.
pub fn parse_prompt_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[tracing::instrument(skip(config))]
async fn load_raw_content(config: &QuestionsConfig) -> Result<String, ContentError> {
    match config.source_type {
        QuestionSourceType::Builtin => Err(ContentError::Config(
            "builtin source has no raw content".to_string(),
        )),
        QuestionSourceType::File => {
            let file_path = config.file_path.as_ref().ok_or_else(|| {
                ContentError::Config("File path required for file source".to_string())
            })?;
            tracing::debug!(file.path = %file_path, "Loading prompts from file");
            tokio::fs::read_to_string(file_path)
                .await
                .map_err(|e| ContentError::FileRead {
                    path: file_path.clone(),
                    source: e,
                })
        }
        QuestionSourceType::Http => {
            let url = config.http_url.as_ref().ok_or_else(|| {
                ContentError::Config("HTTP URL required for http source".to_string())
            })?;
            tracing::debug!(http.url = %url, "Fetching prompts from URL");
            let response = reqwest::get(url)
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| ContentError::HttpFetch {
                    url: url.clone(),
                    source: e,
                })?;

            response.text().await.map_err(|e| ContentError::HttpFetch {
                url: url.clone(),
                source: e,
            })
        }
    }
}

async fn load_configured_pool(config: &QuestionsConfig) -> Result<QuestionPool, ContentError> {
    let raw = load_raw_content(config).await?;
    QuestionPool::new(parse_prompt_list(&raw)).ok_or(ContentError::Empty)
}

/// Loads the configured prompt list, falling back to the built-in prompts
/// when the source is unusable. The server always starts with a pool.
#[tracing::instrument(skip(config), fields(
    questions.source_type = ?config.source_type,
    questions.file_path = ?config.file_path,
    questions.http_url = ?config.http_url
))]
pub async fn load_question_pool(config: &QuestionsConfig) -> QuestionPool {
    if config.source_type == QuestionSourceType::Builtin {
        let pool = QuestionPool::builtin();
        tracing::info!(prompts.count = pool.len(), "Using built-in prompts");
        return pool;
    }

    match load_configured_pool(config).await {
        Ok(pool) => {
            tracing::info!(prompts.count = pool.len(), "Loaded prompts");
            pool
        }
        Err(err) => {
            let pool = QuestionPool::builtin();
            tracing::warn!(
                error = %err,
                prompts.count = pool.len(),
                "Failed to load prompts, falling back to built-in list"
            );
            pool
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_logic::questions::BUILTIN_PROMPTS;
    use std::io::Write;

    fn file_config(path: Option<String>) -> QuestionsConfig {
        QuestionsConfig {
            source_type: QuestionSourceType::File,
            file_path: path,
            http_url: None,
        }
    }

    #[test]
    fn test_parse_prompt_list_skips_blanks_and_comments() {
        let prompts = parse_prompt_list("# header\nName a fruit\n\n   \n  Name a planet  \n");
        assert_eq!(prompts, vec!["Name a fruit", "Name a planet"]);
    }

    #[tokio::test]
    async fn test_loads_prompts_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Name a fruit\nName a planet\nName a fruit").unwrap();

        let config = file_config(Some(file.path().display().to_string()));
        let pool = load_question_pool(&config).await;
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_builtin() {
        let config = file_config(Some("/nonexistent/prompts.txt".to_string()));
        let pool = load_question_pool(&config).await;
        assert_eq!(pool.len(), BUILTIN_PROMPTS.len());
    }

    #[tokio::test]
    async fn test_empty_file_falls_back_to_builtin() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = file_config(Some(file.path().display().to_string()));
        let result = load_configured_pool(&config).await;
        assert!(matches!(result, Err(ContentError::Empty)));
        assert_eq!(load_question_pool(&config).await.len(), BUILTIN_PROMPTS.len());
    }
}
