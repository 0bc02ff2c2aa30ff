use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

pub const BUILTIN_PROMPTS: &[&str] = &[
    "Name a pizza topping",
    "Name a fruit that is yellow",
    "Name a famous detective",
    "Name something you take to the beach",
    "Name a breakfast cereal",
    "Name a planet",
    "Name a board game",
    "Name a reason to be late for work",
    "Name an animal with stripes",
    "Name a superhero",
    "Name a kitchen appliance",
    "Name something people are afraid of",
    "Name a sport played with a ball",
    "Name a holiday destination",
    "Name a musical instrument",
    "Name a type of dog",
    "Name a vegetable kids hate",
    "Name something in a wallet",
    "Name a fast food chain",
    "Name a color of the rainbow",
    "Name a Disney movie",
    "Name a thing you find in a bathroom",
    "Name a winter sport",
    "Name a famous painter",
    "Name a dessert",
    "Name something that flies",
    "Name a job that requires a uniform",
    "Name a hot drink",
    "Name a farm animal",
    "Name a card game",
    "Name something you do on a rainy day",
    "Name a flavour of ice cream",
    "Name a country in Europe",
    "Name a smelly food",
    "Name a wedding tradition",
    "Name a bird that cannot fly",
    "Name a nursery rhyme",
    "Name a mode of transport",
    "Name a cheese",
    "Name something with wheels",
];

/// Shared, immutable prompt list. Per-lobby usage lives on the lobby.
#[derive(Debug, Clone)]
pub struct QuestionPool {
    prompts: Arc<Vec<String>>,
}

impl QuestionPool {
    /// Trims entries and drops blanks and duplicates. `None` when nothing is left.
    pub fn new(prompts: Vec<String>) -> Option<Self> {
        let mut seen = HashSet::new();
        let prompts: Vec<String> = prompts
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty() && seen.insert(p.clone()))
            .collect();

        if prompts.is_empty() {
            return None;
        }
        Some(Self {
            prompts: Arc::new(prompts),
        })
    }

    pub fn builtin() -> Self {
        Self {
            prompts: Arc::new(BUILTIN_PROMPTS.iter().map(|p| p.to_string()).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Draws up to `count` distinct prompts not in `used` and records them as
    /// used. When too few unused prompts remain the lobby's history is
    /// forgotten and the whole pool is eligible again.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        used: &mut BTreeSet<String>,
        count: usize,
        rng: &mut R,
    ) -> Vec<String> {
        let wanted = count.min(self.prompts.len());
        let mut available: Vec<&String> =
            self.prompts.iter().filter(|p| !used.contains(*p)).collect();

        if available.len() < wanted {
            tracing::debug!(
                prompts.used = used.len(),
                prompts.total = self.prompts.len(),
                "Prompt pool exhausted, wrapping around"
            );
            used.clear();
            available = self.prompts.iter().collect();
        }

        let drawn: Vec<String> = available
            .choose_multiple(rng, wanted)
            .map(|p| (*p).clone())
            .collect();
        used.extend(drawn.iter().cloned());
        drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn pool(prompts: &[&str]) -> QuestionPool {
        QuestionPool::new(prompts.iter().map(|p| p.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_new_drops_blanks_and_duplicates() {
        let pool = QuestionPool::new(vec![
            " Name a fruit ".to_string(),
            "".to_string(),
            "Name a fruit".to_string(),
            "Name a planet".to_string(),
        ])
        .unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_new_rejects_empty_list() {
        assert!(QuestionPool::new(vec!["   ".to_string()]).is_none());
    }

    #[test]
    fn test_builtin_pool_has_no_duplicates() {
        let unique: HashSet<&str> = BUILTIN_PROMPTS.iter().copied().collect();
        assert_eq!(unique.len(), BUILTIN_PROMPTS.len());
        assert_eq!(QuestionPool::builtin().len(), BUILTIN_PROMPTS.len());
    }

    #[test]
    fn test_draw_excludes_used_prompts() {
        let pool = pool(&["a", "b", "c", "d"]);
        let mut used = BTreeSet::from(["a".to_string(), "b".to_string()]);
        let mut rng = StdRng::seed_from_u64(1);

        let drawn = pool.draw(&mut used, 2, &mut rng);

        assert_eq!(drawn.len(), 2);
        assert!(drawn.iter().all(|p| p == "c" || p == "d"));
        assert_eq!(used.len(), 4);
    }

    #[test]
    fn test_draw_wraps_around_when_exhausted() {
        let pool = pool(&["a", "b", "c"]);
        let mut used = BTreeSet::from(["a".to_string(), "b".to_string()]);
        let mut rng = StdRng::seed_from_u64(2);

        let drawn = pool.draw(&mut used, 2, &mut rng);

        assert_eq!(drawn.len(), 2);
        assert_ne!(drawn[0], drawn[1]);
        assert_eq!(used.len(), 2);
        assert!(drawn.iter().all(|p| used.contains(p)));
    }

    #[test]
    fn test_draw_never_exceeds_pool_size() {
        let pool = pool(&["only"]);
        let mut used = BTreeSet::new();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(pool.draw(&mut used, 2, &mut rng), vec!["only".to_string()]);
    }

    #[test]
    fn test_seeded_draws_are_deterministic() {
        let pool = QuestionPool::builtin();
        let first = pool.draw(&mut BTreeSet::new(), 2, &mut StdRng::seed_from_u64(42));
        let second = pool.draw(&mut BTreeSet::new(), 2, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }
}
