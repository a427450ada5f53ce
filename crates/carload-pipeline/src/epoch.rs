//! Deal start-epoch derivation from the event block number.

/// Derive the optional deal-activation epoch.
///
/// No configured offset disables the feature entirely. A configured offset
/// without a block number yields `None`; the caller surfaces that as a
/// degraded-but-non-fatal warning. Otherwise the epoch is the block number
/// plus the offset, saturating at `i64::MAX`, so `None` always means a
/// missing input rather than an arithmetic edge.
#[must_use]
pub fn compute(block_number: Option<u64>, offset: Option<u64>) -> Option<i64> {
    let offset = offset?;
    let block = block_number?;
    Some(i64::try_from(block.saturating_add(offset)).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_offset_to_block_number() {
        assert_eq!(compute(Some(1_000), Some(807)), Some(1_807));
    }

    #[test]
    fn disabled_without_configured_offset() {
        assert_eq!(compute(Some(1_000), None), None);
        assert_eq!(compute(None, None), None);
    }

    #[test]
    fn degrades_without_block_number() {
        assert_eq!(compute(None, Some(807)), None);
    }

    #[test]
    fn saturates_instead_of_dropping_on_overflow() {
        assert_eq!(compute(Some(u64::MAX), Some(1)), Some(i64::MAX));
        assert_eq!(
            compute(Some(u64::try_from(i64::MAX).unwrap_or(0)), Some(1)),
            Some(i64::MAX)
        );
    }
}
