//! Cursor positions and seek resolution.
//!
//! Row indexes are 1-based. A cursor remembers, per chapter, the index its next
//! unpositioned fetch starts at; every chapter starts at row 1.
use std::collections::HashMap;

use thiserror::Error;

use crate::{
    protocol::{
        SeekDescription,
        header::{BOOKMARK_FIRST, BOOKMARK_LAST},
    },
    rowset::Binding,
};

use super::CursorHandle;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SeekError {
    #[error("ratio {numerator}/{denominator} is not a fraction in (0, 1]")]
    BadRatio { numerator: u32, denominator: u32 },

    #[error("seeking by bookmark list is not supported")]
    Unsupported,

    #[error("seek needs the total row count")]
    MissingTotal,
}

/// Per-chapter fetch positions of one cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    chapters: HashMap<u32, u32>,
}

impl Position {
    pub fn get(&self, chapter: u32) -> u32 {
        self.chapters.get(&chapter).copied().unwrap_or(1)
    }

    pub fn set(&mut self, chapter: u32, index: u32) {
        self.chapters.insert(chapter, index);
    }
}

#[derive(Debug, Clone)]
pub struct Cursor {
    pub handle: CursorHandle,
    pub position: Position,
    pub binding: Option<Binding>,
}

impl Cursor {
    pub fn new(handle: CursorHandle) -> Self {
        Self {
            handle,
            position: Position::default(),
            binding: None,
        }
    }
}

/// Rejects seeks that can never be resolved, before any backend work is done.
pub fn validate(seek: &SeekDescription) -> Result<(), SeekError> {
    match *seek {
        SeekDescription::AtRatio {
            numerator,
            denominator,
        } if numerator == 0 || numerator > denominator => Err(SeekError::BadRatio {
            numerator,
            denominator,
        }),
        SeekDescription::ByBookmark { .. } => Err(SeekError::Unsupported),
        _ => Ok(()),
    }
}

/// Whether resolving `seek` requires the query's total row count.
pub fn needs_total(seek: &SeekDescription) -> bool {
    matches!(
        seek,
        SeekDescription::AtRatio { .. }
            | SeekDescription::At {
                bookmark: BOOKMARK_LAST,
                ..
            }
    )
}

/// Row index a bookmark refers to.
pub fn bookmark_position(bookmark: u32, total: Option<u32>) -> Result<u32, SeekError> {
    match bookmark {
        BOOKMARK_FIRST => Ok(1),
        BOOKMARK_LAST => total.ok_or(SeekError::MissingTotal),
        index => Ok(index),
    }
}

/// Absolute starting index of a fetch.
pub fn resolve(seek: &SeekDescription, stored: u32, total: Option<u32>) -> Result<u32, SeekError> {
    validate(seek)?;
    match *seek {
        SeekDescription::None => Ok(stored),
        SeekDescription::Next { skip } => Ok(stored.saturating_add(skip)),
        SeekDescription::At { bookmark, skip } => {
            Ok(bookmark_position(bookmark, total)?.saturating_add(skip))
        }
        SeekDescription::AtRatio {
            numerator,
            denominator,
        } => {
            let total = u64::from(total.ok_or(SeekError::MissingTotal)?);
            let index = u64::from(numerator) * total / u64::from(denominator);
            Ok((index as u32).max(1))
        }
        SeekDescription::ByBookmark { .. } => Err(SeekError::Unsupported),
    }
}

/// Seek a client should use to continue a positioned fetch that came back
/// short while more results exist. `next` is the first row not yet consumed,
/// which the returned seek resolves to.
pub fn resume_seek(
    seek: &SeekDescription,
    next: u32,
    requested: u32,
    returned: u32,
    no_more: bool,
) -> Option<SeekDescription> {
    if !matches!(seek, SeekDescription::At { .. }) || returned >= requested || no_more {
        return None;
    }
    Some(SeekDescription::At {
        bookmark: next.saturating_sub(1),
        skip: 1,
    })
}
