//! Course and content key validation.
//!
//! Both the slash-separated legacy forms and the versioned forms are
//! accepted. The canonical form of a key is its trimmed input.

use crate::error::{MilestoneError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const COURSE_V1_PREFIX: &str = "course-v1:";
const BLOCK_V1_PREFIX: &str = "block-v1:";
const I4X_PREFIX: &str = "i4x://";

fn is_segment(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '~'))
}

fn all_segments<'a>(parts: impl Iterator<Item = &'a str>, count: usize) -> bool {
    let mut seen = 0;
    for part in parts {
        if !is_segment(part) {
            return false;
        }
        seen += 1;
    }
    seen == count
}

/// Identifies a course, e.g. `edX/DemoX/2024` or `course-v1:edX+DemoX+2024`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CourseKey(String);

impl CourseKey {
    pub fn parse(input: &str) -> Result<Self> {
        let key = input.trim();
        let valid = match key.strip_prefix(COURSE_V1_PREFIX) {
            Some(rest) => all_segments(rest.split('+'), 3),
            None => all_segments(key.split('/'), 3),
        };
        if valid {
            Ok(Self(key.to_string()))
        } else {
            Err(MilestoneError::InvalidCourseKey(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifies a content unit within a course, e.g.
/// `i4x://edX/DemoX/html/intro` or
/// `block-v1:edX+DemoX+2024+type@html+block@intro`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    pub fn parse(input: &str) -> Result<Self> {
        let key = input.trim();
        let valid = if let Some(rest) = key.strip_prefix(I4X_PREFIX) {
            all_segments(rest.split('/'), 4)
        } else if let Some(rest) = key.strip_prefix(BLOCK_V1_PREFIX) {
            Self::valid_block(rest)
        } else {
            false
        };
        if valid {
            Ok(Self(key.to_string()))
        } else {
            Err(MilestoneError::InvalidContentKey(input.to_string()))
        }
    }

    fn valid_block(rest: &str) -> bool {
        let parts: Vec<&str> = rest.split('+').collect();
        let [org, course, run, block_type, block_id] = parts.as_slice() else {
            return false;
        };
        let tagged = |part: &str, tag: &str| part.strip_prefix(tag).is_some_and(is_segment);
        is_segment(org)
            && is_segment(course)
            && is_segment(run)
            && tagged(*block_type, "type@")
            && tagged(*block_id, "block@")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! key_conversions {
    ($key:ty) => {
        impl fmt::Display for $key {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $key {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $key {
            type Error = MilestoneError;

            fn try_from(value: String) -> Result<Self> {
                Self::parse(&value)
            }
        }

        impl From<$key> for String {
            fn from(key: $key) -> String {
                key.0
            }
        }
    };
}

key_conversions!(CourseKey);
key_conversions!(ContentKey);
