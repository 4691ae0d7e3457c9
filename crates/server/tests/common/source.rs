//! Scripted artifact sources.

use almanac_core::{Artifact, ImageDate};
use almanac_source::{ArtifactSource, SourceError, SourceResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How the stub source answers every fetch.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug)]
pub enum StubBehavior {
    /// Return a small PNG-typed artifact.
    Image,
    /// Fail as an unreachable upstream would.
    Unavailable,
    /// Reject the entry as a video.
    Video,
}

#[allow(dead_code)]
pub struct StubSource {
    behavior: StubBehavior,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl StubSource {
    pub fn new(behavior: StubBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactSource for StubSource {
    async fn fetch(&self, date: ImageDate) -> SourceResult<Artifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            StubBehavior::Image => Ok(Artifact::new(
                Bytes::from_static(b"\x89PNG\r\n\x1a\n"),
                Some("image/png".to_string()),
            )),
            StubBehavior::Unavailable => Err(SourceError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            }),
            StubBehavior::Video => Err(SourceError::UnsupportedMedia {
                date,
                media_type: "video".to_string(),
            }),
        }
    }

    fn source_name(&self) -> &'static str {
        "stub"
    }
}
