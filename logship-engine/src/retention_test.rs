#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    use logship_core::RetentionPolicy;

    use crate::retention::{select_for_deletion, Candidate};

    fn cand(seq: u64, size: u64, age_secs: u64, now: SystemTime) -> Candidate {
        let name = format!("dev-{:010}-1.log", seq);
        Candidate {
            path: PathBuf::from("/tmp").join(&name),
            name,
            size,
            modified: Some(now - Duration::from_secs(age_secs)),
        }
    }

    fn policy(max_age: Option<Duration>, max_total_bytes: Option<u64>) -> RetentionPolicy {
        RetentionPolicy {
            max_age,
            max_total_bytes,
            ..Default::default()
        }
    }

    /// Test: Age rule deletes only files older than `max_age`
    #[test]
    fn test_age_rule() {
        let now = SystemTime::now();
        let cands = vec![cand(1, 10, 600, now), cand(2, 10, 30, now)];
        let out = select_for_deletion(&policy(Some(Duration::from_secs(60)), None), &cands, now);
        assert_eq!(out, vec![cands[0].clone()]);
    }

    /// Test: Size rule frees the excess, oldest first
    ///
    /// Flow
    /// - Three 100 byte files with a 150 byte cap (excess 150)
    ///
    /// Expected
    /// - Files 1 and 2 are selected, file 3 stays
    #[test]
    fn test_size_rule_oldest_first() {
        let now = SystemTime::now();
        let cands = vec![cand(1, 100, 5, now), cand(2, 100, 4, now), cand(3, 100, 3, now)];
        let out = select_for_deletion(&policy(None, Some(150)), &cands, now);
        let names: Vec<&str> = out.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![cands[0].name.as_str(), cands[1].name.as_str()]);
    }

    /// Test: Age and size rules combine without double counting
    #[test]
    fn test_age_then_size() {
        let now = SystemTime::now();
        let cands = vec![cand(1, 100, 900, now), cand(2, 100, 5, now), cand(3, 100, 4, now)];
        let out = select_for_deletion(
            &policy(Some(Duration::from_secs(60)), Some(100)),
            &cands,
            now,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], cands[0]);
        assert_eq!(out[1], cands[1]);
    }

    /// Test: Within limits nothing is selected
    #[test]
    fn test_nothing_selected() {
        let now = SystemTime::now();
        let cands = vec![cand(1, 10, 5, now)];
        assert!(select_for_deletion(&policy(Some(Duration::from_secs(60)), Some(100)), &cands, now).is_empty());
        assert!(select_for_deletion(&RetentionPolicy::default(), &cands, now).is_empty());
    }
}
