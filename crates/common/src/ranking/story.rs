//! Story recommendation pipeline
//!
//! Five stages, each a plain function over explicit inputs:
//! [`keyword_gate`] -> [`score`] -> [`order`] -> [`select`] -> [`format`].
//! [`recommend`] chains them for one account; [`recommend_batch`] runs a whole
//! profile list with a single seeded generator.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::{Direction, RankingChain};
use crate::config::RankingConfig;
use crate::types::SENTINEL;

/// Whether a profile value means "nothing"
fn is_absent(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == "-" || value == SENTINEL
}

/// One catalogue story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub keyword: String,
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// Ordered story catalogue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryCatalogue {
    stories: Vec<Story>,
}

impl StoryCatalogue {
    pub fn new(stories: Vec<Story>) -> Self {
        Self { stories }
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    pub fn get(&self, id: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == id)
    }

    /// Stories sharing `keyword` across the whole catalogue
    pub fn sibling_count(&self, keyword: &str) -> usize {
        self.stories.iter().filter(|s| s.keyword == keyword).count()
    }
}

/// Interest profile of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub account: String,
    #[serde(default = "sentinel")]
    pub keyword: String,
    /// Owned product attributes; a comma separated string is also accepted
    #[serde(default, deserialize_with = "owned_list")]
    pub owned: Vec<String>,
}

fn sentinel() -> String {
    SENTINEL.to_string()
}

fn owned_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Owned {
        List(Vec<String>),
        Joined(String),
    }

    let raw = match Owned::deserialize(deserializer)? {
        Owned::List(items) => items,
        Owned::Joined(joined) => joined.split(',').map(str::to_string).collect(),
    };
    Ok(raw
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !is_absent(s))
        .collect())
}

impl AccountProfile {
    pub fn new(account: impl Into<String>, keyword: impl Into<String>, owned: &[&str]) -> Self {
        Self {
            account: account.into(),
            keyword: keyword.into(),
            owned: owned.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn keyword(&self) -> Option<&str> {
        (!is_absent(&self.keyword)).then(|| self.keyword.trim())
    }

    pub fn owns_nothing(&self) -> bool {
        self.owned.iter().all(|o| is_absent(o))
    }
}

/// Stage 1 result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate<'a> {
    /// Skip the remaining stages
    Canned([String; 2]),
    Candidates(Vec<&'a Story>),
}

/// A candidate with its stage 2 scores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredStory {
    pub id: String,
    pub keyword: String,
    pub match_count: usize,
    pub mismatch_count: usize,
    pub sibling_count: usize,
    /// Best (lowest) priority among matched attributes
    pub matched_priority: u32,
    /// Best (lowest) priority among mismatched attributes
    pub mismatched_priority: u32,
    pub index: usize,
}

/// Stage 4 result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub rank1: Vec<ScoredStory>,
    pub rank2: Vec<ScoredStory>,
}

/// Final recommendation for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Recommendation {
    /// Account has neither keyword nor products
    Canned { first: String, second: String },
    Pair { first: String, second: String },
    Single { id: String },
    /// Known combination; one option was drawn at random
    RandomPick { options: Vec<String>, chosen: String },
    /// Ties the rules cannot resolve
    NeedsReview { rank1: Vec<String>, rank2: Vec<String> },
}

impl Recommendation {
    /// Story ids in display order
    pub fn story_ids(&self) -> Vec<&str> {
        match self {
            Recommendation::Canned { first, second } | Recommendation::Pair { first, second } => {
                vec![first, second]
            }
            Recommendation::Single { id } => vec![id],
            Recommendation::RandomPick { chosen, .. } => vec![chosen],
            Recommendation::NeedsReview { .. } => Vec::new(),
        }
    }

    pub fn needs_review(&self) -> bool {
        matches!(self, Recommendation::NeedsReview { .. })
    }
}

/// One entry of the batch pass output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryRecommendation {
    pub account: String,
    pub recommendation: Recommendation,
}

/// Stage 1: keep stories whose keyword matches the account's
///
/// An account with no keyword and no products gets the canned pair. An account
/// with products but no keyword is not gated. An empty result also falls back
/// to the canned pair.
pub fn keyword_gate<'a>(
    profile: &AccountProfile,
    catalogue: &'a StoryCatalogue,
    rules: &RankingConfig,
) -> Gate<'a> {
    let candidates: Vec<&Story> = match profile.keyword() {
        None if profile.owns_nothing() => return Gate::Canned(rules.canned_pair.clone()),
        None => catalogue.stories().iter().collect(),
        Some(keyword) => catalogue
            .stories()
            .iter()
            .filter(|s| s.keyword == keyword)
            .collect(),
    };

    if candidates.is_empty() {
        debug!(account = %profile.account, "No stories passed the keyword gate");
        return Gate::Canned(rules.canned_pair.clone());
    }
    Gate::Candidates(candidates)
}

/// Stage 2: match and mismatch counts per candidate
pub fn score(
    profile: &AccountProfile,
    candidates: &[&Story],
    catalogue: &StoryCatalogue,
    rules: &RankingConfig,
) -> Vec<ScoredStory> {
    let owned: BTreeSet<&str> = profile
        .owned
        .iter()
        .map(String::as_str)
        .filter(|o| !is_absent(o))
        .collect();
    let priority = |attr: &str| rules.attribute_priority.get(attr).copied().unwrap_or(u32::MAX);

    candidates
        .iter()
        .enumerate()
        .map(|(index, story)| {
            let attributes: BTreeSet<&str> = story.attributes.iter().map(String::as_str).collect();
            let matched: Vec<&str> = owned.iter().copied().filter(|o| attributes.contains(o)).collect();
            let mismatched: Vec<&str> = story
                .attributes
                .iter()
                .map(String::as_str)
                .filter(|a| !owned.contains(a))
                .collect();

            ScoredStory {
                id: story.id.clone(),
                keyword: story.keyword.clone(),
                match_count: matched.len(),
                mismatch_count: mismatched.len(),
                sibling_count: catalogue.sibling_count(&story.keyword),
                matched_priority: matched.iter().map(|a| priority(a)).min().unwrap_or(u32::MAX),
                mismatched_priority: mismatched.iter().map(|a| priority(a)).min().unwrap_or(u32::MAX),
                index,
            }
        })
        .collect()
}

/// Composite key used by stages 3 and 4
pub fn story_chain() -> RankingChain<ScoredStory> {
    RankingChain::new()
        .by("match_count", |s: &ScoredStory| s.match_count, Direction::Descending)
        .by("sibling_count", |s: &ScoredStory| s.sibling_count, Direction::Ascending)
        .by("matched_priority", |s: &ScoredStory| s.matched_priority, Direction::Ascending)
        .by("mismatch_count", |s: &ScoredStory| s.mismatch_count, Direction::Ascending)
        .by("mismatched_priority", |s: &ScoredStory| s.mismatched_priority, Direction::Ascending)
}

/// Stage 3: order candidates, input position breaking exact ties
pub fn order(scored: Vec<ScoredStory>) -> Vec<ScoredStory> {
    story_chain().then_by_insertion().rank(scored)
}

/// Stage 4: rank-1 and rank-2 groups, ties included
pub fn select(ordered: &[ScoredStory]) -> Selection {
    let chain = story_chain();
    let mut selection = Selection::default();

    for story in ordered {
        let joins_rank1 = selection.rank1.first().map_or(true, |head| chain.ties(head, story));
        if selection.rank2.is_empty() && joins_rank1 {
            selection.rank1.push(story.clone());
            continue;
        }
        match selection.rank2.first() {
            None => selection.rank2.push(story.clone()),
            Some(head) if chain.ties(head, story) => selection.rank2.push(story.clone()),
            Some(_) => break,
        }
    }
    selection
}

/// Stage 5: turn a selection into a recommendation
pub fn format(selection: &Selection, rules: &RankingConfig, rng: &mut StdRng) -> Recommendation {
    let ids = |group: &[ScoredStory]| group.iter().map(|s| s.id.clone()).collect::<Vec<_>>();
    let rank1_ids: BTreeSet<&str> = selection.rank1.iter().map(|s| s.id.as_str()).collect();

    let combination = rules.random_combinations.iter().find(|combo| {
        let combo: BTreeSet<&str> = combo.iter().map(String::as_str).collect();
        !combo.is_empty() && combo == rank1_ids
    });
    if let Some(options) = combination {
        if let Some(chosen) = options.choose(rng) {
            info!(%chosen, ?options, "Random pick from known combination");
            return Recommendation::RandomPick {
                options: options.clone(),
                chosen: chosen.clone(),
            };
        }
    }

    match (selection.rank1.as_slice(), selection.rank2.as_slice()) {
        ([first], [second]) => Recommendation::Pair {
            first: first.id.clone(),
            second: second.id.clone(),
        },
        ([first, second], _) => Recommendation::Pair {
            first: first.id.clone(),
            second: second.id.clone(),
        },
        ([only], []) => Recommendation::Single { id: only.id.clone() },
        _ => Recommendation::NeedsReview {
            rank1: ids(&selection.rank1),
            rank2: ids(&selection.rank2),
        },
    }
}

/// Run the full pipeline for one account
pub fn recommend(
    profile: &AccountProfile,
    catalogue: &StoryCatalogue,
    rules: &RankingConfig,
    rng: &mut StdRng,
) -> Recommendation {
    let candidates = match keyword_gate(profile, catalogue, rules) {
        Gate::Canned([first, second]) => return Recommendation::Canned { first, second },
        Gate::Candidates(candidates) => candidates,
    };
    let ordered = order(score(profile, &candidates, catalogue, rules));
    let recommendation = format(&select(&ordered), rules, rng);
    if recommendation.needs_review() {
        warn!(account = %profile.account, ?recommendation, "Story ranking needs review");
    }
    recommendation
}

/// One recommendation per profile, in profile order
pub fn recommend_batch(
    profiles: &[AccountProfile],
    catalogue: &StoryCatalogue,
    rules: &RankingConfig,
) -> Vec<StoryRecommendation> {
    let mut rng = match rules.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    profiles
        .iter()
        .map(|profile| StoryRecommendation {
            account: profile.account.clone(),
            recommendation: recommend(profile, catalogue, rules, &mut rng),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(id: &str, keyword: &str, attributes: &[&str]) -> Story {
        Story {
            id: id.to_string(),
            keyword: keyword.to_string(),
            attributes: attributes.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_canned_pair_when_profile_is_empty() {
        let catalogue = StoryCatalogue::new(vec![story("1-1", "Pets", &["TV"])]);
        let rules = RankingConfig::default();
        let profile = AccountProfile::new("a", "none", &[]);

        assert_eq!(
            recommend(&profile, &catalogue, &rules, &mut rng()),
            Recommendation::Canned {
                first: "38-2".to_string(),
                second: "38-1".to_string()
            }
        );
    }

    #[test]
    fn test_gate_filters_by_keyword() {
        let catalogue = StoryCatalogue::new(vec![
            story("1-1", "Pets", &[]),
            story("2-1", "Cooking", &[]),
            story("1-2", "Pets", &[]),
        ]);
        let rules = RankingConfig::default();

        match keyword_gate(&AccountProfile::new("a", "Pets", &[]), &catalogue, &rules) {
            Gate::Candidates(c) => assert_eq!(c.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["1-1", "1-2"]),
            other => panic!("unexpected gate: {:?}", other),
        }
        match keyword_gate(&AccountProfile::new("a", "-", &["TV"]), &catalogue, &rules) {
            Gate::Candidates(c) => assert_eq!(c.len(), 3),
            other => panic!("unexpected gate: {:?}", other),
        }
        assert!(matches!(
            keyword_gate(&AccountProfile::new("a", "Gaming", &["TV"]), &catalogue, &rules),
            Gate::Canned(_)
        ));
    }

    #[test]
    fn test_score_counts_matches_and_mismatches() {
        let catalogue = StoryCatalogue::new(vec![story("1-1", "Pets", &["TV", "Mobile", "Washer"])]);
        let mut rules = RankingConfig::default();
        rules.attribute_priority.insert("Mobile".to_string(), 1);
        rules.attribute_priority.insert("TV".to_string(), 2);
        rules.attribute_priority.insert("Washer".to_string(), 5);

        let profile = AccountProfile::new("a", "Pets", &["TV", "Mobile", "Watch"]);
        let candidates: Vec<&Story> = catalogue.stories().iter().collect();
        let scored = score(&profile, &candidates, &catalogue, &rules);

        assert_eq!(scored[0].match_count, 2);
        assert_eq!(scored[0].mismatch_count, 1);
        assert_eq!(scored[0].matched_priority, 1);
        assert_eq!(scored[0].mismatched_priority, 5);
        assert_eq!(scored[0].sibling_count, 1);
    }

    #[test]
    fn test_fewer_siblings_rank_higher_on_equal_matches() {
        let catalogue = StoryCatalogue::new(vec![
            story("1-1", "Pets", &["TV"]),
            story("1-2", "Pets", &["Washer"]),
            story("1-3", "Pets", &["Watch"]),
            story("2-1", "Cooking", &["TV"]),
        ]);
        let rules = RankingConfig::default();
        let profile = AccountProfile::new("a", "-", &["TV"]);

        assert_eq!(
            recommend(&profile, &catalogue, &rules, &mut rng()),
            Recommendation::Pair {
                first: "2-1".to_string(),
                second: "1-1".to_string()
            }
        );
    }

    #[test]
    fn test_select_groups_ties_and_stops_early() {
        let scored = |id: &str, match_count: usize, index: usize| ScoredStory {
            id: id.to_string(),
            keyword: "k".to_string(),
            match_count,
            mismatch_count: 0,
            sibling_count: 1,
            matched_priority: u32::MAX,
            mismatched_priority: u32::MAX,
            index,
        };
        let ordered = order(vec![
            scored("c", 1, 0),
            scored("a", 3, 1),
            scored("d", 0, 2),
            scored("b", 3, 3),
            scored("e", 1, 4),
        ]);
        let selection = select(&ordered);

        let ids = |g: &[ScoredStory]| g.iter().map(|s| s.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&selection.rank1), vec!["a", "b"]);
        assert_eq!(ids(&selection.rank2), vec!["c", "e"]);
    }

    #[test]
    fn test_single_when_only_one_candidate() {
        let catalogue = StoryCatalogue::new(vec![story("1-1", "Pets", &["TV"])]);
        let rules = RankingConfig::default();
        let profile = AccountProfile::new("a", "Pets", &[]);
        assert_eq!(
            recommend(&profile, &catalogue, &rules, &mut rng()),
            Recommendation::Single { id: "1-1".to_string() }
        );
    }

    #[test]
    fn test_unresolved_ties_need_review() {
        let catalogue = StoryCatalogue::new(vec![
            story("1-1", "Pets", &["TV"]),
            story("1-2", "Pets", &["TV"]),
            story("1-3", "Pets", &["TV"]),
        ]);
        let rules = RankingConfig::default();
        let profile = AccountProfile::new("a", "Pets", &["TV"]);
        let recommendation = recommend(&profile, &catalogue, &rules, &mut rng());
        assert_eq!(
            recommendation,
            Recommendation::NeedsReview {
                rank1: vec!["1-1".to_string(), "1-2".to_string(), "1-3".to_string()],
                rank2: vec![],
            }
        );
        assert!(recommendation.story_ids().is_empty());
    }

    #[test]
    fn test_tied_second_slot_needs_review() {
        let catalogue = StoryCatalogue::new(vec![
            story("1-1", "Pets", &["TV", "Mobile"]),
            story("1-2", "Pets", &["TV"]),
            story("1-3", "Pets", &["TV"]),
        ]);
        let rules = RankingConfig::default();
        let profile = AccountProfile::new("a", "Pets", &["TV", "Mobile"]);

        // A unique leader does not settle which runner-up fills the second slot
        assert_eq!(
            recommend(&profile, &catalogue, &rules, &mut rng()),
            Recommendation::NeedsReview {
                rank1: vec!["1-1".to_string()],
                rank2: vec!["1-2".to_string(), "1-3".to_string()],
            }
        );
    }

    #[test]
    fn test_known_combination_is_a_recorded_random_pick() {
        let catalogue = StoryCatalogue::new(vec![
            story("35-1", "Ease of use", &["Mobile", "TV"]),
            story("35-2", "Ease of use", &["Mobile", "TV"]),
            story("35-3", "Ease of use", &["Mobile", "TV"]),
            story("42-3", "Ease of use", &["Mobile", "TV"]),
            story("35-4", "Ease of use", &["Washer"]),
        ]);
        let mut rules = RankingConfig::default();
        rules.seed = Some(9);
        let profiles = vec![AccountProfile::new("a", "Ease of use", &["Mobile", "TV"])];

        let first = recommend_batch(&profiles, &catalogue, &rules);
        let second = recommend_batch(&profiles, &catalogue, &rules);
        assert_eq!(first, second);

        match &first[0].recommendation {
            Recommendation::RandomPick { options, chosen } => {
                assert_eq!(options.len(), 4);
                assert!(options.contains(chosen));
            }
            other => panic!("expected a random pick, got {:?}", other),
        }
    }

    #[test]
    fn test_profile_accepts_joined_owned_list() {
        let yaml = "account: a@example.com\nkeyword: Pets\nowned: \"TV, Mobile ,-\"\n";
        let profile: AccountProfile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.owned, vec!["TV", "Mobile"]);

        let bare: AccountProfile = serde_yaml::from_str("account: b@example.com\n").unwrap();
        assert_eq!(bare.keyword(), None);
        assert!(bare.owns_nothing());
    }
}
