use super::loader::PatternTable;

// ---------------------------------------------------------------------------
// Condition exclusion: drop nuisance regressors, covariates, ...
// ---------------------------------------------------------------------------

/// Whether `label` matches any entry of `remove_cope` (as a substring).
pub fn is_excluded(label: &str, remove_cope: &[String]) -> bool {
    remove_cope.iter().any(|r| label.contains(r.as_str()))
}

/// Return indices of trials whose label survives `remove_cope`.
///
/// An empty `remove_cope` keeps everything.
pub fn retained_indices(labels: &[String], remove_cope: &[String]) -> Vec<usize> {
    labels
        .iter()
        .enumerate()
        .filter(|(_, label)| !is_excluded(label, remove_cope))
        .map(|(i, _)| i)
        .collect()
}

/// Keep only the rows of `table` listed in `indices`, in that order.
pub fn select_rows(table: PatternTable, indices: &[usize]) -> PatternTable {
    let PatternTable {
        labels,
        patterns,
        variances,
    } = table;

    PatternTable {
        labels: indices.iter().map(|&i| labels[i].clone()).collect(),
        patterns: indices.iter().map(|&i| patterns[i].clone()).collect(),
        variances: variances.map(|v| indices.iter().map(|&i| v[i].clone()).collect()),
    }
}

/// Drop every trial excluded by `remove_cope`, logging what went.
pub fn exclude_copes(table: PatternTable, remove_cope: &[String]) -> PatternTable {
    let keep = retained_indices(&table.labels, remove_cope);
    let dropped = table.len() - keep.len();
    if dropped > 0 {
        log::warn!("Dropping {dropped} trials matching {remove_cope:?}");
    }
    select_rows(table, &keep)
}
