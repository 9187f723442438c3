use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A loaded value together with the time it was fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_stale(&self, stale_minutes: i64) -> bool {
        self.age_minutes() >= stale_minutes
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cached_data_age_display_just_now() {
        let cached = CachedData::new(vec![1, 2, 3]);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_cached_data_age_display_rounding() {
        let mut cached = CachedData::new(());
        cached.cached_at = Utc::now() - Duration::minutes(12);
        assert_eq!(cached.age_display(), "12m ago");

        cached.cached_at = Utc::now() - Duration::minutes(95);
        assert_eq!(cached.age_display(), "2h ago");

        cached.cached_at = Utc::now() - Duration::hours(26);
        assert_eq!(cached.age_display(), "1d ago");
    }

    #[test]
    fn test_cached_data_is_stale() {
        let fresh = CachedData::new(vec![1]);
        assert!(!fresh.is_stale(5));

        let mut old = CachedData::new(vec![1]);
        old.cached_at = Utc::now() - Duration::minutes(6);
        assert!(old.is_stale(5));
        assert!(!old.is_stale(60));
    }

    #[test]
    fn test_zero_threshold_is_always_stale() {
        let cached = CachedData::new(());
        assert!(cached.is_stale(0));
    }
}
