//! Mapping between physical device IDs and the virtual device IDs derived
//! from them.
//!
//! A virtual ID is `"{physical_id}-{replica_index}"` with the index written in
//! canonical decimal. The index never contains the separator, so splitting at
//! the rightmost `-` always recovers the original pair, whatever characters
//! the physical ID itself contains.

use core::error::Error;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;

use error_stack::Report;

const SEPARATOR: char = '-';

#[derive(Debug, derive_more::Display)]
pub enum VirtualIdError {
    #[display("malformed virtual device ID: {id:?}")]
    Malformed { id: String },
}

impl Error for VirtualIdError {}

pub fn encode(physical_id: &str, replica_index: usize) -> String {
    format!("{physical_id}{SEPARATOR}{replica_index}")
}

/// Split a virtual ID into its physical ID and replica index.
///
/// # Errors
///
/// - [`VirtualIdError::Malformed`] if the ID has no separator, an empty
///   physical part, or an index that is not a canonical decimal
pub fn decode(virtual_id: &str) -> Result<(&str, usize), Report<VirtualIdError>> {
    let malformed = || {
        Report::new(VirtualIdError::Malformed {
            id: virtual_id.to_string(),
        })
    };

    let (physical_id, index) = virtual_id.rsplit_once(SEPARATOR).ok_or_else(malformed)?;
    if physical_id.is_empty() || !is_canonical_decimal(index) {
        return Err(malformed());
    }
    let index = index.parse::<usize>().map_err(|_| malformed())?;
    Ok((physical_id, index))
}

/// Resolve virtual IDs to the deduplicated set of physical IDs owning them.
pub fn group_by_physical<I, S>(virtual_ids: I) -> Result<BTreeSet<String>, Report<VirtualIdError>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    virtual_ids
        .into_iter()
        .map(|id| decode(id.as_ref()).map(|(physical_id, _)| physical_id.to_string()))
        .collect()
}

/// All virtual IDs derived from one physical device, in replica order.
pub fn expand(physical_id: &str, replicas: NonZeroUsize) -> impl Iterator<Item = String> + '_ {
    (0..replicas.get()).map(move |i| encode(physical_id, i))
}

fn is_canonical_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) && (s == "0" || !s.starts_with('0'))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn round_trip() {
        for physical_id in ["gpu0", "GPU-1234", "GPU-5f3a-9", "a-b-c-1-2", "-x"] {
            for i in [0, 1, 7, 10, 123] {
                let id = encode(physical_id, i);
                assert_eq!(decode(&id).unwrap(), (physical_id, i), "id {id}");
            }
        }
    }

    #[test]
    fn uuid_style_ids_split_on_rightmost_separator() {
        let id = encode("GPU-8e3a1c2d-0000-4f3b-9d3e-1", 3);
        assert_eq!(id, "GPU-8e3a1c2d-0000-4f3b-9d3e-1-3");
        assert_eq!(decode(&id).unwrap(), ("GPU-8e3a1c2d-0000-4f3b-9d3e-1", 3));
    }

    #[test]
    fn rejects_malformed_ids() {
        for id in ["gpu0", "", "-1", "gpu0-", "gpu0-a", "gpu0-01", "gpu0-+1", "gpu0- 1"] {
            let err = decode(id).unwrap_err();
            assert!(
                matches!(err.current_context(), VirtualIdError::Malformed { id: bad } if bad == id),
                "expected {id:?} to be malformed"
            );
        }
    }

    #[test]
    fn grouping_deduplicates() {
        let physical = group_by_physical(["gpu0-0", "gpu0-1", "gpu0-2", "gpu1-0"]).unwrap();
        assert_eq!(
            physical.into_iter().collect::<Vec<_>>(),
            vec!["gpu0".to_string(), "gpu1".to_string()]
        );
    }

    #[test]
    fn grouping_fails_on_first_malformed_id() {
        let err = group_by_physical(["gpu0-0", "bogus"]).unwrap_err();
        assert_eq!(err.current_context().to_string(), "malformed virtual device ID: \"bogus\"");
    }

    #[test]
    fn expand_yields_one_id_per_replica() {
        let ids: Vec<_> = expand("gpu0", NonZeroUsize::new(3).unwrap()).collect();
        assert_eq!(ids, vec!["gpu0-0", "gpu0-1", "gpu0-2"]);
    }
}
