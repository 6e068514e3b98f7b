//! Notification sink.

use std::future::Future;

use serde::Serialize;

use crate::error::NotifyError;

/// Who can see a posted note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    /// Only explicitly mentioned users; used in development mode.
    Specified,
}

/// Fire-and-forget delivery of one text message.
pub trait Notifier: Send + Sync + 'static {
    fn send(
        &self,
        text: &str,
        visibility: Visibility,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}
