//! Firmware update and diagnostics status-notification sequencing
//! (spec.md §9 supplement, from `original_source/FirmwareService.cpp`):
//! `UpdateFirmware`/`GetDiagnostics` status transitions only, not actual
//! file transfer or flashing (that's a host/collaborator concern).
//!
//! Grounded on the teacher's `application/charging/commands/v16/
//! update_firmware.rs` / `v201/get_log.rs` request shapes; the status
//! machine itself has no teacher analog (the teacher is a CSMS, it only
//! sends the request and waits for status notifications) so its
//! transitions are grounded directly on the original C++ service.

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareStatus {
    Idle,
    Downloading,
    Downloaded,
    DownloadFailed,
    Installing,
    Installed,
    InstallationFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticsStatus {
    Idle,
    Uploading,
    Uploaded,
    UploadFailed,
}

/// A transition the status machine refused because it isn't reachable
/// from the current state (spec.md design note: status sequencing must
/// be monotonic, never skip or regress except via an explicit failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: FirmwareStatus,
    pub to: FirmwareStatus,
}

pub struct FirmwareStatusMachine {
    state: FirmwareStatus,
}

impl FirmwareStatusMachine {
    pub fn new() -> Self {
        Self {
            state: FirmwareStatus::Idle,
        }
    }

    pub fn status(&self) -> FirmwareStatus {
        self.state
    }

    pub fn advance(&mut self, to: FirmwareStatus) -> Result<(), IllegalTransition> {
        use FirmwareStatus::*;
        let allowed = matches!(
            (self.state, to),
            (Idle, Downloading)
                | (Downloading, Downloaded)
                | (Downloading, DownloadFailed)
                | (Downloaded, Installing)
                | (Installing, Installed)
                | (Installing, InstallationFailed)
                | (Installed, Idle)
                | (DownloadFailed, Idle)
                | (InstallationFailed, Idle)
        );
        if !allowed {
            return Err(IllegalTransition { from: self.state, to });
        }
        info!(from = ?self.state, to = ?to, "firmware status transition");
        self.state = to;
        Ok(())
    }
}

impl Default for FirmwareStatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DiagnosticsStatusMachine {
    state: DiagnosticsStatus,
}

impl DiagnosticsStatusMachine {
    pub fn new() -> Self {
        Self {
            state: DiagnosticsStatus::Idle,
        }
    }

    pub fn status(&self) -> DiagnosticsStatus {
        self.state
    }

    pub fn advance(&mut self, to: DiagnosticsStatus) -> Result<(), DiagnosticsStatus> {
        use DiagnosticsStatus::*;
        let allowed = matches!(
            (self.state, to),
            (Idle, Uploading) | (Uploading, Uploaded) | (Uploading, UploadFailed) | (Uploaded, Idle) | (UploadFailed, Idle)
        );
        if !allowed {
            return Err(self.state);
        }
        info!(from = ?self.state, to = ?to, "diagnostics status transition");
        self.state = to;
        Ok(())
    }
}

impl Default for DiagnosticsStatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_happy_path() {
        let mut m = FirmwareStatusMachine::new();
        m.advance(FirmwareStatus::Downloading).unwrap();
        m.advance(FirmwareStatus::Downloaded).unwrap();
        m.advance(FirmwareStatus::Installing).unwrap();
        m.advance(FirmwareStatus::Installed).unwrap();
        assert_eq!(m.status(), FirmwareStatus::Installed);
    }

    #[test]
    fn firmware_cannot_skip_states() {
        let mut m = FirmwareStatusMachine::new();
        let err = m.advance(FirmwareStatus::Installed).unwrap_err();
        assert_eq!(err.from, FirmwareStatus::Idle);
    }

    #[test]
    fn firmware_failure_returns_to_idle() {
        let mut m = FirmwareStatusMachine::new();
        m.advance(FirmwareStatus::Downloading).unwrap();
        m.advance(FirmwareStatus::DownloadFailed).unwrap();
        m.advance(FirmwareStatus::Idle).unwrap();
        assert_eq!(m.status(), FirmwareStatus::Idle);
    }

    #[test]
    fn diagnostics_happy_path() {
        let mut m = DiagnosticsStatusMachine::new();
        m.advance(DiagnosticsStatus::Uploading).unwrap();
        m.advance(DiagnosticsStatus::Uploaded).unwrap();
        assert_eq!(m.status(), DiagnosticsStatus::Uploaded);
    }
}
