//! Upload status of image inputs.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Status of a single image upload.
///
/// Transitions only move forward: `Pending -> Uploading -> Uploaded | Failed`,
/// or `Pending -> Failed` when the source cannot be read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum UploadStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Transfer in flight, with the fraction done in `0.0..=1.0`.
    Uploading(f32),
    /// Finished; the service can read the image from this URL.
    Uploaded(Url),
    /// Finished without a URL.
    Failed(String),
}

impl UploadStatus {
    /// Whether the upload reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Uploaded(_) | Self::Failed(_))
    }

    /// Returns the uploaded URL, if any.
    pub fn url(&self) -> Option<&Url> {
        match self {
            Self::Uploaded(url) => Some(url),
            _ => None,
        }
    }

    /// Returns the failure reason, if any.
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Moves to `next` if the transition is allowed.
    ///
    /// On a disallowed transition the status is left unchanged.
    pub fn advance(&mut self, next: UploadStatus) -> Result<()> {
        let allowed = match (&*self, &next) {
            (Self::Pending, Self::Uploading(p)) => (0.0..=1.0).contains(p),
            (Self::Pending, Self::Failed(_)) => true,
            (Self::Uploading(p), Self::Uploading(q)) => q >= p && *q <= 1.0,
            (Self::Uploading(_), Self::Uploaded(_) | Self::Failed(_)) => true,
            _ => false,
        };

        if !allowed {
            return Err(Error::invalid_input()
                .with_message(format!("cannot move upload from {self} to {next}")));
        }

        *self = next;
        Ok(())
    }

    /// Resets a pending or failed upload so it can be sent again.
    ///
    /// Uploads that are in flight or already have a URL are left unchanged.
    pub fn resubmit(&mut self) -> Result<()> {
        match self {
            Self::Pending | Self::Failed(_) => {
                *self = Self::Pending;
                Ok(())
            }
            _ => Err(Error::invalid_input()
                .with_message(format!("cannot upload again while {self}"))),
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Uploading(fraction) => write!(f, "uploading ({:.0}%)", fraction * 100.0),
            Self::Uploaded(url) => write!(f, "uploaded ({url})"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}
