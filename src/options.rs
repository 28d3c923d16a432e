//! Options for one mirror run.
//!
//! [`MirrorOptions`] is the fully resolved input to the engine: file
//! configuration and command-line flags have already been merged by the
//! time one of these exists.

use chrono::{DateTime, TimeDelta, Utc};
use clap::ValueEnum;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::MirrorError;

/// What to do when the destination lookup fails with something other than
/// not-found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InconclusivePolicy {
    /// Leave the key alone and count it as filtered.
    #[default]
    Skip,
    /// Count the key as a failed transfer.
    Fail,
}

/// A `container[/prefix]` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub container: String,
    pub prefix: String,
}

impl Location {
    /// Split `bucket/some/prefix` into container and prefix.
    pub fn parse(raw: &str) -> Result<Self, MirrorError> {
        let (container, prefix) = match raw.split_once('/') {
            Some((container, prefix)) => (container, prefix),
            None => (raw, ""),
        };
        if container.is_empty() {
            return Err(MirrorError::Config(format!("missing container name in {raw:?}")));
        }
        Ok(Self {
            container: container.to_string(),
            prefix: prefix.to_string(),
        })
    }
}

/// Parse a human age such as `7`, `7d`, `12h`, `30m` or `45s`.  A bare
/// number is a count of days.
pub fn parse_age(raw: &str) -> Result<TimeDelta, MirrorError> {
    let raw = raw.trim();
    let invalid = || MirrorError::Config(format!("invalid age {raw:?} (expected e.g. 7, 7d, 12h, 30m, 45s)"));
    let (digits, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], c.to_ascii_lowercase()),
        Some(_) => (raw, 'd'),
        None => return Err(invalid()),
    };
    let amount: i64 = digits.parse().map_err(|_| invalid())?;
    if amount < 0 {
        return Err(invalid());
    }
    let delta = match unit {
        'd' => TimeDelta::try_days(amount),
        'h' => TimeDelta::try_hours(amount),
        'm' => TimeDelta::try_minutes(amount),
        's' => TimeDelta::try_seconds(amount),
        _ => None,
    };
    delta.ok_or_else(invalid)
}

/// Everything the engine needs to know about one run.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub source_container: String,
    pub source_prefix: String,
    pub dest_container: String,
    /// When set, the source prefix is replaced by this one on every key.
    pub dest_prefix: Option<String>,

    /// Attempts per remote operation (1 means no retry).
    pub max_retries: u32,
    /// Ceiling on outstanding jobs.
    pub max_parallelism: usize,
    /// Listing page size.
    pub fetch_size: usize,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,

    pub dry_run: bool,
    pub verbose: bool,
    /// Human form of the age filter, for log lines.
    pub ctime: Option<String>,
    /// Objects last modified before this instant are not copied.
    pub max_age: Option<DateTime<Utc>>,
    /// Tolerate unreadable access descriptors by substituting an empty one.
    pub encrypted_destination: bool,
    /// Delete destination keys with no source counterpart.
    pub delete_removed: bool,
    pub on_inconclusive: InconclusivePolicy,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            source_container: String::new(),
            source_prefix: String::new(),
            dest_container: String::new(),
            dest_prefix: None,
            max_retries: 5,
            max_parallelism: 100,
            fetch_size: 1000,
            retry_delay: Duration::from_millis(10),
            dry_run: false,
            verbose: false,
            ctime: None,
            max_age: None,
            encrypted_destination: false,
            delete_removed: false,
            on_inconclusive: InconclusivePolicy::Skip,
        }
    }
}

impl MirrorOptions {
    /// Mirror `source` into `destination`.  A non-empty destination prefix
    /// turns on prefix remapping.
    pub fn new(source: Location, destination: Location) -> Self {
        let dest_prefix = if destination.prefix.is_empty() {
            None
        } else {
            Some(destination.prefix)
        };
        Self {
            source_container: source.container,
            source_prefix: source.prefix,
            dest_container: destination.container,
            dest_prefix,
            ..Self::default()
        }
    }

    /// Turn on the age filter: only objects modified within `ctime` of `now`
    /// are copied.
    pub fn with_ctime(mut self, ctime: &str, now: DateTime<Utc>) -> Result<Self, MirrorError> {
        let age = parse_age(ctime)?;
        let cutoff = now.checked_sub_signed(age).ok_or_else(|| {
            MirrorError::Config(format!("age {ctime:?} is out of range"))
        })?;
        self.max_age = Some(cutoff);
        self.ctime = Some(ctime.to_string());
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), MirrorError> {
        if self.source_container.is_empty() {
            return Err(MirrorError::Config("source container is required".into()));
        }
        if self.dest_container.is_empty() {
            return Err(MirrorError::Config("destination container is required".into()));
        }
        if self.max_retries == 0 {
            return Err(MirrorError::Config("max_retries must be at least 1".into()));
        }
        if self.max_parallelism == 0 {
            return Err(MirrorError::Config("max_parallelism must be at least 1".into()));
        }
        if self.fetch_size == 0 {
            return Err(MirrorError::Config("fetch_size must be at least 1".into()));
        }
        if self.source_container == self.dest_container
            && self.dest_prefix.as_deref().unwrap_or(&self.source_prefix) == self.source_prefix
        {
            return Err(MirrorError::Config(
                "source and destination are the same location".into(),
            ));
        }
        Ok(())
    }

    /// Destination key for a source key.
    pub fn dest_key(&self, source_key: &str) -> String {
        match &self.dest_prefix {
            Some(dest_prefix) => {
                let rest = source_key
                    .strip_prefix(self.source_prefix.as_str())
                    .unwrap_or(source_key);
                format!("{dest_prefix}{rest}")
            }
            None => source_key.to_string(),
        }
    }

    /// Source key for a destination key (inverse of [`Self::dest_key`]).
    pub fn source_key(&self, dest_key: &str) -> String {
        match &self.dest_prefix {
            Some(dest_prefix) => {
                let rest = dest_key.strip_prefix(dest_prefix.as_str()).unwrap_or(dest_key);
                format!("{}{rest}", self.source_prefix)
            }
            None => dest_key.to_string(),
        }
    }

    /// Prefix under which mirrored keys live in the destination.
    pub fn dest_list_prefix(&self) -> &str {
        self.dest_prefix.as_deref().unwrap_or(&self.source_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(src_prefix: &str, dest_prefix: Option<&str>) -> MirrorOptions {
        MirrorOptions {
            source_container: "src-bucket".into(),
            source_prefix: src_prefix.into(),
            dest_container: "dst-bucket".into(),
            dest_prefix: dest_prefix.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_location_parse() {
        assert_eq!(
            Location::parse("bucket/src/dir/").unwrap(),
            Location {
                container: "bucket".into(),
                prefix: "src/dir/".into()
            }
        );
        assert_eq!(Location::parse("bucket").unwrap().prefix, "");
        assert!(Location::parse("/abs").is_err());
        assert!(Location::parse("").is_err());
    }

    #[test]
    fn test_dest_key_remap() {
        let o = opts("src/", Some("dst/"));
        assert_eq!(o.dest_key("src/file.txt"), "dst/file.txt");
        assert_eq!(o.source_key("dst/file.txt"), "src/file.txt");
        assert_eq!(o.dest_list_prefix(), "dst/");
    }

    #[test]
    fn test_dest_key_without_remap() {
        let o = opts("src/", None);
        assert_eq!(o.dest_key("src/file.txt"), "src/file.txt");
        assert_eq!(o.source_key("src/file.txt"), "src/file.txt");
        assert_eq!(o.dest_list_prefix(), "src/");
    }

    #[test]
    fn test_new_enables_remap_from_locations() {
        let o = MirrorOptions::new(
            Location::parse("a/src/").unwrap(),
            Location::parse("b/dst/").unwrap(),
        );
        assert_eq!(o.dest_key("src/x"), "dst/x");

        // Without a destination prefix keys are copied verbatim.
        let o = MirrorOptions::new(Location::parse("a/src/").unwrap(), Location::parse("b").unwrap());
        assert_eq!(o.dest_key("src/x"), "src/x");

        let o = MirrorOptions::new(Location::parse("a").unwrap(), Location::parse("b").unwrap());
        assert_eq!(o.dest_prefix, None);
    }

    #[test]
    fn test_parse_age_units() {
        assert_eq!(parse_age("7").unwrap(), TimeDelta::days(7));
        assert_eq!(parse_age("7d").unwrap(), TimeDelta::days(7));
        assert_eq!(parse_age("12h").unwrap(), TimeDelta::hours(12));
        assert_eq!(parse_age("30M").unwrap(), TimeDelta::minutes(30));
        assert_eq!(parse_age("45s").unwrap(), TimeDelta::seconds(45));
    }

    #[test]
    fn test_parse_age_rejects_garbage() {
        assert!(parse_age("").is_err());
        assert!(parse_age("d").is_err());
        assert!(parse_age("7w").is_err());
        assert!(parse_age("-3d").is_err());
        assert!(parse_age("seven").is_err());
    }

    #[test]
    fn test_with_ctime_sets_cutoff() {
        let now = Utc::now();
        let o = opts("", None).with_ctime("2d", now).unwrap();
        assert_eq!(o.max_age, Some(now - TimeDelta::days(2)));
        assert_eq!(o.ctime.as_deref(), Some("2d"));
    }

    #[test]
    fn test_with_ctime_out_of_range_is_config_error() {
        let err = opts("", None).with_ctime("100000000", Utc::now()).unwrap_err();
        assert!(matches!(err, MirrorError::Config(_)));
    }

    #[test]
    fn test_validate() {
        assert!(opts("", None).validate().is_ok());

        let mut o = opts("", None);
        o.max_retries = 0;
        assert!(o.validate().is_err());

        let mut o = opts("", None);
        o.max_parallelism = 0;
        assert!(o.validate().is_err());

        let mut o = opts("", None);
        o.fetch_size = 0;
        assert!(o.validate().is_err());

        let mut o = opts("p/", None);
        o.dest_container = o.source_container.clone();
        assert!(o.validate().is_err());
        o.dest_prefix = Some("q/".into());
        assert!(o.validate().is_ok());
    }
}
