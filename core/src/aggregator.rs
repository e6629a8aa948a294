use std::cmp::Ordering;

use crate::types::ProviderResult;

/// Total order used for ranking: confidence descending, then provider
/// priority (remote_ai, remote_search, local), then content fields so that
/// any permutation of the same input sorts identically.
pub fn compare_results(a: &ProviderResult, b: &ProviderResult) -> Ordering {
    b.confidence_score()
        .cmp(&a.confidence_score())
        .then_with(|| a.provider_kind().priority().cmp(&b.provider_kind().priority()))
        .then_with(|| a.title().cmp(b.title()))
        .then_with(|| a.body().cmp(b.body()))
        .then_with(|| a.source_url().cmp(&b.source_url()))
        .then_with(|| a.provider_name().cmp(b.provider_name()))
}

/// Orders results for an answer. Every input result is kept.
pub fn aggregate(mut results: Vec<ProviderResult>) -> Vec<ProviderResult> {
    results.sort_by(compare_results);
    results
}

/// Highest-ranked result, if any
pub fn best(results: &[ProviderResult]) -> Option<&ProviderResult> {
    results.iter().min_by(|a, b| compare_results(a, b))
}
