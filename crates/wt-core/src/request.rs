//! Inbound request and response types.
//!
//! Requests are a tagged union dispatched through a single handler; every
//! request is answered, even when the engine has to degrade.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::EnforcementAction;
use crate::bucket::Bucket;
use crate::timer::TabId;

/// An inbound request, identified by its `action` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    /// Begin tracking a tab in a bucket.
    StartTimer { tab_id: TabId, bucket: Bucket },

    /// Today's totals and the configured limits.
    GetLiveStats,

    /// A page agent asking whether it should be blocked. The tab id is
    /// implicit in the sender and may be missing when the sender cannot
    /// be identified.
    CheckMyStatus {
        #[serde(default)]
        tab_id: Option<TabId>,
    },

    /// The bucket currently assigned to a tab, if any.
    GetTabStatus { tab_id: TabId },
}

/// Outcome of a `startTimer` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new running timer was created.
    Started,
    /// The tab already had a timer; nothing changed.
    AlreadyTracked,
    /// The bucket is over budget; a tainted timer was written and no
    /// clock started.
    Blocked,
}

/// Reply to an inbound request. Serialized shape mirrors the request it
/// answers, so variants are untagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Response {
    Start {
        success: bool,
        blocked: bool,
    },
    LiveStats {
        /// Today's totals in milliseconds per bucket.
        stats: BTreeMap<Bucket, i64>,
        /// Configured limits in minutes per bucket; unenforced buckets
        /// are absent.
        limits: BTreeMap<Bucket, i64>,
    },
    Status {
        action: EnforcementAction,
    },
    TabStatus {
        bucket: Option<Bucket>,
    },
}

impl Response {
    /// Maps a start outcome onto the wire shape.
    #[must_use]
    pub const fn from_start(outcome: StartOutcome) -> Self {
        match outcome {
            StartOutcome::Started => Self::Start {
                success: true,
                blocked: false,
            },
            StartOutcome::AlreadyTracked => Self::Start {
                success: false,
                blocked: false,
            },
            StartOutcome::Blocked => Self::Start {
                success: true,
                blocked: true,
            },
        }
    }
}
