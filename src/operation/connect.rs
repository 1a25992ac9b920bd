use crate::connection::NativeSession;
use crate::core::db::ConnectParams;
use crate::core::EngineError;
use tracing::{debug, warn};

/// Establishes the native handle of its connection.
#[derive(Debug)]
pub struct ConnectOperation {
    params: ConnectParams,
}

impl ConnectOperation {
    pub fn new(params: ConnectParams) -> Self {
        ConnectOperation { params }
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    /// Performs the blocking handshake on a worker thread.
    ///
    /// On failure the session is left without a usable handle.
    pub(crate) fn execute(&self, session: &NativeSession) -> Result<(), EngineError> {
        match session.driver().connect(&self.params) {
            Ok(handle) => {
                session.install(handle);
                debug!("Connected to {}:{}", self.params.host, self.params.port);
                Ok(())
            }
            Err(err) => {
                session.clear();
                warn!("Connect to {}:{} failed: {}", self.params.host, self.params.port, err);
                Err(err)
            }
        }
    }
}
