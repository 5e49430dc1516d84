//! Scoped access to the native device library.
//!
//! The library is not safe for overlapping init/shutdown pairs, so every
//! session holds a process-wide lock from open until close.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use error_stack::Report;
use error_stack::ResultExt;

use crate::error::ScanError;
use crate::library::DeviceLibrary;
use crate::library::LibraryError;
use crate::library::LibraryLoader;

static SESSION_LOCK: Mutex<()> = Mutex::new(());

/// An open device-library session.
///
/// The library is shut down exactly once: by [`NativeSession::close`], or on
/// drop when a caller leaves early.
pub struct NativeSession<L: DeviceLibrary> {
    library: Option<L>,
    _exclusive: MutexGuard<'static, ()>,
}

impl<L: DeviceLibrary> NativeSession<L> {
    /// Waits for any other session to close, then initializes the library.
    pub fn open<B>(loader: &B) -> Result<Self, Report<ScanError>>
    where
        B: LibraryLoader<Library = L>,
    {
        // the guarded state is empty, a panic elsewhere cannot corrupt it
        let exclusive = SESSION_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        let library = loader
            .load()
            .change_context(ScanError::SessionUnavailable)?;
        tracing::debug!("device library session opened");

        Ok(Self {
            library: Some(library),
            _exclusive: exclusive,
        })
    }

    fn library(&self) -> Result<&L, LibraryError> {
        self.library.as_ref().ok_or(LibraryError::SessionClosed)
    }

    pub fn device_count(&self) -> Result<u32, LibraryError> {
        self.library()?.device_count()
    }

    pub fn handle_at(&self, index: u32) -> Result<L::Device<'_>, LibraryError> {
        self.library()?.device_by_index(index)
    }

    pub fn driver_version(&self) -> Result<String, LibraryError> {
        self.library()?.driver_version()
    }

    /// Shuts the library down and releases the session lock.
    pub fn close(mut self) -> Result<(), LibraryError> {
        match self.library.take() {
            Some(library) => {
                tracing::debug!("closing device library session");
                library.shutdown()
            }
            None => Ok(()),
        }
    }
}

impl<L: DeviceLibrary> Drop for NativeSession<L> {
    fn drop(&mut self) {
        if let Some(library) = self.library.take() {
            tracing::debug!("device library session dropped without close, shutting down");
            if let Err(e) = library.shutdown() {
                tracing::warn!("Failed to shut down device library: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::library::mock::MockDevice;
    use crate::library::mock::MockLoader;

    #[test]
    fn close_shuts_down_once() {
        let loader = MockLoader::new(vec![MockDevice::healthy(0)]);

        let session = NativeSession::open(&loader).expect("mock library loads");
        assert_eq!(session.device_count().expect("count"), 1);
        session.close().expect("shutdown succeeds");

        assert_eq!(loader.calls().opened(), 1);
        assert_eq!(loader.calls().closed(), 1);
    }

    #[test]
    fn drop_shuts_down_when_not_closed() {
        let loader = MockLoader::new(vec![MockDevice::healthy(0)]);

        {
            let session = NativeSession::open(&loader).expect("mock library loads");
            let _handle = session.handle_at(0).expect("device exists");
        }

        assert_eq!(loader.calls().opened(), 1);
        assert_eq!(loader.calls().closed(), 1);
    }

    #[test]
    fn failed_open_reports_session_unavailable() {
        let loader = MockLoader::new(Vec::new()).failing_init("driver not loaded");

        let error = match NativeSession::open(&loader) {
            Ok(_) => panic!("open should fail"),
            Err(e) => e,
        };

        assert_eq!(error.current_context(), &ScanError::SessionUnavailable);
        assert_eq!(loader.calls().opened(), 0);
        assert_eq!(loader.calls().closed(), 0);
    }

    #[test]
    fn sessions_are_serialized() {
        let loader = std::sync::Arc::new(MockLoader::new(vec![MockDevice::healthy(0)]));

        let first = NativeSession::open(&*loader).expect("first session");

        let (opened_tx, opened_rx) = std::sync::mpsc::channel();
        let second = {
            let loader = loader.clone();
            std::thread::spawn(move || {
                let session = NativeSession::open(&*loader).expect("second session");
                opened_tx.send(()).expect("test receiver alive");
                session.close().expect("second close");
            })
        };

        // the second session must wait for the first to close
        assert!(opened_rx
            .recv_timeout(std::time::Duration::from_millis(100))
            .is_err());
        assert_eq!(loader.calls().opened(), 1);

        first.close().expect("first close");
        opened_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("second session opens after the first closes");
        second.join().expect("second thread");

        assert_eq!(loader.calls().opened(), 2);
        assert_eq!(loader.calls().closed(), 2);
    }
}
