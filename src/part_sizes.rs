//! Part planner
//!
//! Decides whether content should be uploaded as a large file and, if so, how
//! to split it into parts that satisfy the service's size constraints.

use crate::config::MAX_PARTS_PER_LARGE_FILE;
use crate::error::{Result, TransferError};
use crate::models::{AccountAuthorization, PartSpec};
use tracing::debug;

/// Part size constraints captured from an account authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSizes {
    minimum_part_size: u64,
    recommended_part_size: u64,
    max_parts: u32,
}

impl PartSizes {
    /// Create part sizes from explicit constraints
    ///
    /// # Returns
    /// * `Err(TransferError::Precondition)` if the minimum is zero, the
    ///   recommendation is below the minimum, or fewer than two parts are allowed
    pub fn new(minimum_part_size: u64, recommended_part_size: u64, max_parts: u32) -> Result<Self> {
        if minimum_part_size == 0 {
            return Err(TransferError::Precondition(
                "minimum_part_size must be at least 1".to_string(),
            ));
        }
        if recommended_part_size < minimum_part_size {
            return Err(TransferError::Precondition(format!(
                "recommended_part_size ({}) must be >= minimum_part_size ({})",
                recommended_part_size, minimum_part_size
            )));
        }
        if max_parts < 2 {
            return Err(TransferError::Precondition(format!(
                "max_parts must be at least 2, got {}",
                max_parts
            )));
        }
        Ok(PartSizes {
            minimum_part_size,
            recommended_part_size,
            max_parts,
        })
    }

    /// Capture the part sizes from an account authorization
    pub fn from_authorization(auth: &AccountAuthorization, max_parts: u32) -> Result<Self> {
        Self::new(
            auth.absolute_minimum_part_size,
            auth.recommended_part_size,
            max_parts.min(MAX_PARTS_PER_LARGE_FILE),
        )
    }

    pub fn minimum_part_size(&self) -> u64 {
        self.minimum_part_size
    }

    pub fn recommended_part_size(&self) -> u64 {
        self.recommended_part_size
    }

    pub fn max_parts(&self) -> u32 {
        self.max_parts
    }

    /// Whether the content could be a large file at all
    ///
    /// Strictly greater: there must be two parts, the first one
    /// `minimum_part_size` long and the second at least one byte.
    pub fn is_large_enough_to_split(&self, content_length: u64) -> bool {
        content_length > self.minimum_part_size
    }

    /// Whether the content should be a large file
    ///
    /// Below two recommended-size parts there's no throughput to gain, so the
    /// content should go up in one piece even when splitting is possible.
    pub fn should_split(&self, content_length: u64) -> bool {
        content_length >= self.recommended_part_size.saturating_mul(2)
    }

    /// Split `content_length` bytes into parts
    ///
    /// All parts but the last have the same size; the last one absorbs the
    /// remainder, so it is never smaller than the others.
    ///
    /// # Returns
    /// * `Err(TransferError::Precondition)` if the content is too small to split
    pub fn plan(&self, content_length: u64) -> Result<Vec<PartSpec>> {
        if !self.is_large_enough_to_split(content_length) {
            return Err(TransferError::Precondition(format!(
                "content_length={} is too small to make at least two parts.  minimum_part_size={}",
                content_length, self.minimum_part_size
            )));
        }

        let minimum = self.minimum_part_size;
        let recommended = self.recommended_part_size;

        let (part_count, part_size, last_part_size) = if content_length < minimum.saturating_mul(2) {
            // the first part has to be a minimum part, the rest goes in the second
            (2u64, minimum, content_length - minimum)
        } else if content_length < recommended.saturating_mul(2) {
            // two halves; the last one gets the odd byte, if any
            let part_size = content_length / 2 + content_length % 2;
            (2u64, part_size, content_length - part_size)
        } else {
            let part_count = (content_length / recommended).min(u64::from(self.max_parts));
            let part_size = content_length / part_count;
            let last_part_size = content_length - (part_count - 1) * part_size;
            if last_part_size < part_size {
                return Err(TransferError::Internal(format!(
                    "last part ({}) is smaller than the others ({})",
                    last_part_size, part_size
                )));
            }
            (part_count, part_size, last_part_size)
        };

        if part_count < 2 || part_size < minimum || last_part_size < 1 {
            return Err(TransferError::Internal(format!(
                "bad plan for content_length={}: part_count={}, part_size={}, last_part_size={}",
                content_length, part_count, part_size, last_part_size
            )));
        }

        // part_count <= max_parts, which is a u32
        let part_count = part_count as u32;
        let mut parts = Vec::with_capacity(part_count as usize);
        for i in 0..part_count - 1 {
            parts.push(PartSpec::new(i + 1, u64::from(i) * part_size, part_size));
        }
        parts.push(PartSpec::new(
            part_count,
            content_length - last_part_size,
            last_part_size,
        ));

        debug!(
            "Planned {} parts for content_length={} (part_size={}, last_part_size={}, minimum={}, recommended={})",
            part_count, content_length, part_size, last_part_size, minimum, recommended
        );

        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(minimum: u64, recommended: u64) -> PartSizes {
        PartSizes::new(minimum, recommended, MAX_PARTS_PER_LARGE_FILE).unwrap()
    }

    #[test]
    fn test_smallest_large_file() {
        let sizes = sizes(5, 5);
        assert!(sizes.is_large_enough_to_split(10));
        assert!(sizes.should_split(10));
        assert_eq!(
            sizes.plan(10).unwrap(),
            vec![PartSpec::new(1, 0, 5), PartSpec::new(2, 5, 5)]
        );
    }

    #[test]
    fn test_too_small_to_split() {
        let sizes = sizes(5, 10);
        assert!(!sizes.is_large_enough_to_split(5));
        assert!(matches!(
            sizes.plan(5),
            Err(TransferError::Precondition(_))
        ));
        assert!(sizes.plan(0).is_err());
    }

    #[test]
    fn test_below_two_minimums_makes_minimum_first_part() {
        let sizes = sizes(100, 1000);
        assert_eq!(
            sizes.plan(150).unwrap(),
            vec![PartSpec::new(1, 0, 100), PartSpec::new(2, 100, 50)]
        );
    }

    #[test]
    fn test_below_two_recommended_splits_in_half() {
        let sizes = sizes(100, 1000);
        assert_eq!(
            sizes.plan(1001).unwrap(),
            vec![PartSpec::new(1, 0, 501), PartSpec::new(2, 501, 500)]
        );
        assert_eq!(
            sizes.plan(1000).unwrap(),
            vec![PartSpec::new(1, 0, 500), PartSpec::new(2, 500, 500)]
        );
    }

    #[test]
    fn test_last_part_absorbs_remainder() {
        let sizes = sizes(100, 1000);
        let parts = sizes.plan(3500).unwrap();
        assert_eq!(
            parts,
            vec![
                PartSpec::new(1, 0, 1166),
                PartSpec::new(2, 1166, 1166),
                PartSpec::new(3, 2332, 1168),
            ]
        );
    }

    #[test]
    fn test_part_count_is_capped() {
        let sizes = PartSizes::new(1, 1, 10).unwrap();
        let parts = sizes.plan(1_000).unwrap();
        assert_eq!(parts.len(), 10);
        assert!(parts.iter().all(|p| p.length == 100));
    }

    #[test]
    fn test_should_split_is_independent_of_minimum() {
        let sizes = sizes(10, 100);
        assert!(sizes.is_large_enough_to_split(50));
        assert!(!sizes.should_split(199));
        assert!(sizes.should_split(200));
    }

    #[test]
    fn test_invalid_constraints() {
        assert!(PartSizes::new(0, 10, 100).is_err());
        assert!(PartSizes::new(10, 5, 100).is_err());
        assert!(PartSizes::new(10, 10, 1).is_err());
    }

    #[test]
    fn test_from_authorization() {
        let auth = AccountAuthorization {
            account_id: "acct".to_string(),
            authorization_token: "tok".to_string(),
            api_url: "https://api.example.com".to_string(),
            download_url: "https://f.example.com".to_string(),
            recommended_part_size: 100_000_000,
            absolute_minimum_part_size: 5_000_000,
        };
        let sizes = PartSizes::from_authorization(&auth, 20_000).unwrap();
        assert_eq!(sizes.minimum_part_size(), 5_000_000);
        assert_eq!(sizes.recommended_part_size(), 100_000_000);
        assert_eq!(sizes.max_parts(), MAX_PARTS_PER_LARGE_FILE);
    }
}
