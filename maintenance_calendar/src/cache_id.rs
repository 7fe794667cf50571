use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheIdError {
    #[error("cache resource id {0:?} has fewer than three `/`- or `_`-delimited segments")]
    TooFewSegments(Box<str>),
    #[error("cache resource id {0:?} has an empty segment")]
    EmptySegment(Box<str>),
    #[error("cache resource id {0:?} has no `-`-delimited member number")]
    MissingMemberIndex(Box<str>),
    #[error("cache resource id {id:?} ends with {index:?}, which isn't a member number")]
    InvalidMemberIndex { id: Box<str>, index: Box<str> },
    #[error("cache resource id {0:?} has member number 0; member numbers start at 1")]
    ZeroMemberIndex(Box<str>),
}

/// An ElastiCache node, as named by the Health API.
///
/// These look like `orders-cache/0001/orders-cache-0001-002`: the replication group is everything
/// before the final two `/` or `_` delimited segments, and the trailing `-` delimited number is
/// the 1-based position of the node among the group's member clusters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheMemberId {
    pub replication_group: Box<str>,
    /// 1-based.
    pub member_index: usize,
}

impl CacheMemberId {
    /// Index of this member into a replication group's list of member clusters.
    pub fn member_offset(&self) -> usize {
        self.member_index - 1
    }
}

impl FromStr for CacheMemberId {
    type Err = CacheIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('/', "_");
        let segments = normalized.split('_').collect::<Vec<_>>();
        if segments.len() < 3 {
            return Err(CacheIdError::TooFewSegments(s.into()));
        }
        if segments.iter().any(|x| x.is_empty()) {
            return Err(CacheIdError::EmptySegment(s.into()));
        }
        let replication_group = segments[..segments.len() - 2].join("_");

        let Some((_, index)) = s.rsplit_once('-') else {
            return Err(CacheIdError::MissingMemberIndex(s.into()));
        };
        let invalid_index = || CacheIdError::InvalidMemberIndex {
            id: s.into(),
            index: index.into(),
        };
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid_index());
        }
        let member_index = index.parse::<usize>().map_err(|_| invalid_index())?;
        if member_index == 0 {
            return Err(CacheIdError::ZeroMemberIndex(s.into()));
        }

        Ok(Self {
            replication_group: replication_group.into(),
            member_index,
        })
    }
}

impl fmt::Display for CacheMemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} member #{}", self.replication_group, self.member_index)
    }
}
