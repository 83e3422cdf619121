//! Local Channel Sounding controller interface.
//!
//! The session drives the controller through [`CsController`] during setup
//! and once per ranging cycle. Each call resolves when the controller has
//! acknowledged the command; subevent results and procedure enable events
//! arrive separately through the session's notification entry points.

use core::fmt;

use crate::config::{CreateConfigParams, DefaultSettings, ProcedureParameters};

/// Failure reported by the local controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControllerError {
    /// The controller rejected the command with a status code.
    Rejected(i16),
    /// The connection the command targeted no longer exists.
    Disconnected,
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::Rejected(code) => write!(f, "controller rejected command ({code})"),
            ControllerError::Disconnected => f.write_str("connection lost"),
        }
    }
}

/// Subset of the peer's CS capabilities reported during setup.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteCapabilities {
    pub num_config_supported: u8,
    pub max_consecutive_procedures_supported: u16,
    pub num_antennas_supported: u8,
    pub max_antenna_paths_supported: u8,
    pub initiator_supported: bool,
    pub reflector_supported: bool,
    pub mode_3_supported: bool,
}

impl RemoteCapabilities {
    /// Returns `true` when the peer can act as a reflector for this session.
    #[must_use]
    pub const fn supports_reflector(&self) -> bool {
        self.reflector_supported
    }
}

impl fmt::Display for RemoteCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "configs={} antennas={} max_paths={} initiator={} reflector={} mode3={}",
            self.num_config_supported,
            self.num_antennas_supported,
            self.max_antenna_paths_supported,
            self.initiator_supported,
            self.reflector_supported,
            self.mode_3_supported
        )
    }
}

/// Parameters reported when the controller enables or disables procedures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProcedureEnableInfo {
    pub config_id: u8,
    pub enabled: bool,
    /// Transmit power the controller selected, in dBm.
    pub selected_tx_power: i8,
    /// Subevent length in microseconds.
    pub subevent_len: u32,
    pub procedure_count: u16,
}

/// Commands issued to the local CS controller.
#[allow(async_fn_in_trait)]
pub trait CsController {
    /// Enables roles and radio limits for the connection.
    async fn set_default_settings(
        &mut self,
        settings: &DefaultSettings,
    ) -> Result<(), ControllerError>;

    /// Reads the peer's CS capabilities.
    async fn read_remote_capabilities(&mut self) -> Result<RemoteCapabilities, ControllerError>;

    /// Creates the CS configuration on both controllers.
    async fn create_config(&mut self, params: &CreateConfigParams) -> Result<(), ControllerError>;

    /// Starts the CS security procedure.
    async fn enable_security(&mut self) -> Result<(), ControllerError>;

    /// Applies procedure scheduling parameters.
    async fn set_procedure_parameters(
        &mut self,
        params: &ProcedureParameters,
    ) -> Result<(), ControllerError>;

    /// Enables the next run of procedures for `config_id`.
    async fn enable_procedures(&mut self, config_id: u8) -> Result<(), ControllerError>;
}
