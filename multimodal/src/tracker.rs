use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use super::{
    error::{MediaConnectorError, MultiModalResult},
    media::{MediaConnector, MediaSource},
    types::ImageFrame,
};

type PendingImage = (usize, MultiModalResult<ImageFrame>);

/// Resolves the images of one request concurrently.
///
/// Images are fetched in whatever order the network allows, but
/// [`finalize`](Self::finalize) returns them in the order they were pushed.
/// The first failure wins; the remaining fetches are aborted when the
/// tracker is dropped.
pub struct AsyncMultiModalTracker {
    media_connector: Arc<MediaConnector>,
    pending: JoinSet<PendingImage>,
    count: usize,
}

impl AsyncMultiModalTracker {
    pub fn new(media_connector: Arc<MediaConnector>) -> Self {
        Self {
            media_connector,
            pending: JoinSet::new(),
            count: 0,
        }
    }

    /// Queues an `image_url` value for resolution and returns its position.
    pub fn push_image(&mut self, url: &str) -> usize {
        let index = self.count;
        self.count += 1;

        let source = MediaSource::from_url(url);
        let connector = Arc::clone(&self.media_connector);
        self.pending
            .spawn(async move { (index, connector.fetch_image(source).await) });
        index
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub async fn finalize(mut self) -> MultiModalResult<Vec<ImageFrame>> {
        let mut slots: Vec<Option<ImageFrame>> = (0..self.count).map(|_| None).collect();

        while let Some(joined) = self.pending.join_next().await {
            let (index, result) = joined.map_err(|e| MediaConnectorError::Task(e.to_string()))?;
            match result {
                Ok(frame) => slots[index] = Some(frame),
                Err(err) => {
                    debug!(index, error = %err, "Image resolution failed, aborting the rest");
                    return Err(err);
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, frame)| {
                frame.ok_or_else(|| MediaConnectorError::Task(format!("image {index} was never resolved")))
            })
            .collect()
    }
}
