use crate::core::error::{FetchError, FetchResult};
use crate::core::naming::ResourceName;

/// Name of the first request of a fetch: the base name plus one trailing
/// segment component.
pub fn first_request(base: &ResourceName, segment: u64) -> ResourceName {
    base.add_segment(segment)
}

/// Name of the follow-up request, derived from the name the responder
/// actually used rather than from the locally built one, so a transport
/// that rewrites the prefix (forwarding hints) keeps working.
pub fn next_request(responded: &ResourceName, segment: u64) -> ResourceName {
    responded.without_last_component().add_segment(segment)
}

/// Checks that a response answers segment `expected`. Its name is what the
/// next request is derived from, so a name without a trailing segment
/// number is refused rather than trimmed.
pub fn check_response(responded: &ResourceName, expected: u64) -> FetchResult<()> {
    match responded.last_segment() {
        Some(got) if got == expected => Ok(()),
        Some(got) => Err(FetchError::UnexpectedSegment { name: responded.clone(), expected, got }),
        None => Err(FetchError::decode(responded, "response name carries no segment number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_derivation_paths_agree() {
        let base: ResourceName = "/dev/chronoshare/file/abcd".parse().unwrap();
        for k in [0u64, 1, 7, 255, 256, 65_535] {
            let responded = first_request(&base, k);
            assert_eq!(next_request(&responded, k + 1), base.add_segment(k + 1));
        }
    }

    #[test]
    fn next_request_follows_the_responders_prefix() {
        let hinted: ResourceName = "/hint/dev/file/abcd".parse().unwrap();
        let responded: ResourceName = "/dev/file/abcd".parse().unwrap();
        let next = next_request(&responded.add_segment(0), 1);
        assert_eq!(next, responded.add_segment(1));
        assert!(!next.starts_with(&hinted));
    }

    #[test]
    fn responses_must_name_the_requested_segment() {
        let base: ResourceName = "/dev/file/abcd".parse().unwrap();
        assert!(check_response(&base.add_segment(2), 2).is_ok());
        assert!(matches!(
            check_response(&base.add_segment(3), 2),
            Err(FetchError::UnexpectedSegment { expected: 2, got: 3, .. })
        ));
        assert!(matches!(check_response(&base, 0), Err(FetchError::Decode { .. })));
    }
}
