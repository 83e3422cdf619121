//! Controller and session configuration presets.
//!
//! Plain data handed to the [`CsController`](crate::controller::CsController)
//! during setup, plus the timeouts that bound every wait of the ranging loop.
//! The `const fn` presets describe a single-antenna initiator running mode-2
//! procedures back to back against a reflector.

use core::time::Duration;

use crate::procedure::Role;

/// Number of bytes in a CS channel map (channels 0..=79).
pub const CHANNEL_MAP_LEN: usize = 10;

/// Configuration identifier used for every CS configuration this session
/// creates.
pub const CONFIG_ID: u8 = 0;

/// Mode-0 steps preceding each subevent.
pub const MODE_0_STEPS: u8 = 3;

/// Antenna selection used for CS_SYNC packets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AntennaSelection {
    /// Cycle through the antennas in repetition.
    Repetitive,
    /// Use a fixed antenna index.
    Fixed(u8),
}

/// Role enablement and radio limits applied before any CS configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DefaultSettings {
    pub enable_initiator_role: bool,
    pub enable_reflector_role: bool,
    pub sync_antenna_selection: AntennaSelection,
    /// Upper bound on transmit power in dBm.
    pub max_tx_power: i8,
}

impl DefaultSettings {
    /// Highest transmit power a controller accepts for CS.
    pub const MAX_TX_POWER: i8 = 20;

    #[must_use]
    pub const fn initiator() -> Self {
        Self {
            enable_initiator_role: true,
            enable_reflector_role: false,
            sync_antenna_selection: AntennaSelection::Repetitive,
            max_tx_power: Self::MAX_TX_POWER,
        }
    }

    #[must_use]
    pub const fn reflector() -> Self {
        Self {
            enable_initiator_role: false,
            enable_reflector_role: true,
            sync_antenna_selection: AntennaSelection::Repetitive,
            max_tx_power: Self::MAX_TX_POWER,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MainMode {
    Mode1,
    Mode2,
    Mode3,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SubMode {
    Unused,
    Mode1,
    Mode2,
    Mode3,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RttType {
    AccessAddressOnly,
    FractionalSounding32,
    FractionalSounding96,
    RandomSequence32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyncPhy {
    Le1M,
    Le2M,
    Le2M2Bt,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelSelection {
    Algorithm3B,
    Algorithm3C,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Ch3cShape {
    Hat,
    Interleaved,
}

/// Parameters of the CS configuration created on both controllers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CreateConfigParams {
    pub id: u8,
    pub main_mode: MainMode,
    pub sub_mode: SubMode,
    pub min_main_mode_steps: u8,
    pub max_main_mode_steps: u8,
    pub main_mode_repetition: u8,
    pub mode_0_steps: u8,
    pub role: Role,
    pub rtt_type: RttType,
    pub sync_phy: SyncPhy,
    pub channel_map_repetition: u8,
    pub channel_selection: ChannelSelection,
    pub ch3c_shape: Ch3cShape,
    pub ch3c_jump: u8,
    pub channel_map: [u8; CHANNEL_MAP_LEN],
}

impl CreateConfigParams {
    #[must_use]
    pub const fn initiator() -> Self {
        Self {
            id: CONFIG_ID,
            main_mode: MainMode::Mode2,
            sub_mode: SubMode::Mode1,
            min_main_mode_steps: 10,
            max_main_mode_steps: 20,
            main_mode_repetition: 0,
            mode_0_steps: MODE_0_STEPS,
            role: Role::Initiator,
            rtt_type: RttType::AccessAddressOnly,
            sync_phy: SyncPhy::Le1M,
            channel_map_repetition: 5,
            channel_selection: ChannelSelection::Algorithm3B,
            ch3c_shape: Ch3cShape::Hat,
            ch3c_jump: 2,
            channel_map: valid_channel_map(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcedurePhy {
    Le1M,
    Le2M,
    LeCodedS8,
    LeCodedS2,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ToneAntennaConfig {
    IndexOne,
    IndexTwo,
    IndexThree,
    IndexFour,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PreferredPeerAntenna {
    Antenna1,
    Antenna2,
    Antenna3,
    Antenna4,
}

/// Signal-to-noise control adjustment, or `NotUsed`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SnrControl {
    NotUsed,
    Db(u8),
}

/// Scheduling and radio parameters of the procedures run under a
/// configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProcedureParameters {
    pub config_id: u8,
    /// Maximum procedure duration in 0.625 ms units.
    pub max_procedure_len: u16,
    /// Procedure interval bounds in connection events.
    pub min_procedure_interval: u16,
    pub max_procedure_interval: u16,
    /// Procedures per enable; zero repeats until disabled.
    pub max_procedure_count: u16,
    /// Subevent length bounds in microseconds.
    pub min_subevent_len: u32,
    pub max_subevent_len: u32,
    pub tone_antenna_config: ToneAntennaConfig,
    pub phy: ProcedurePhy,
    /// Transmit power delta; `0x80` lets the controller choose.
    pub tx_power_delta: u8,
    pub preferred_peer_antenna: PreferredPeerAntenna,
    pub snr_control_initiator: SnrControl,
    pub snr_control_reflector: SnrControl,
}

impl ProcedureParameters {
    #[must_use]
    pub const fn initiator() -> Self {
        Self {
            config_id: CONFIG_ID,
            max_procedure_len: 100,
            min_procedure_interval: 100,
            max_procedure_interval: 100,
            max_procedure_count: 1,
            min_subevent_len: 60_000,
            max_subevent_len: 60_000,
            tone_antenna_config: ToneAntennaConfig::IndexOne,
            phy: ProcedurePhy::Le1M,
            tx_power_delta: 0x80,
            preferred_peer_antenna: PreferredPeerAntenna::Antenna1,
            snr_control_initiator: SnrControl::NotUsed,
            snr_control_reflector: SnrControl::NotUsed,
        }
    }
}

/// Bounds on every wait of the ranging loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RangingTimeouts {
    /// Wait for the local controller to finish a procedure.
    pub local_complete: Duration,
    /// Wait for the peer to announce its ranging data.
    pub peer_ready: Duration,
    /// Extra wait for a peer announcement after a local timeout.
    pub realignment_grace: Duration,
    /// Wait for a requested ranging-data transfer to finish.
    pub fetch: Duration,
}

impl RangingTimeouts {
    pub const DEFAULT: Self = Self {
        local_complete: Duration::from_secs(1),
        peer_ready: Duration::from_secs(1),
        realignment_grace: Duration::from_secs(1),
        fetch: Duration::from_secs(5),
    };

    /// Returns `true` when the local, peer and fetch waits are non-zero. A
    /// zero grace window disables the realignment wait.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !self.local_complete.is_zero()
            && !self.peer_ready.is_zero()
            && !self.fetch.is_zero()
    }
}

impl Default for RangingTimeouts {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Everything a session needs to set up the link and run the loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionConfig {
    pub role: Role,
    pub default_settings: DefaultSettings,
    pub create_config: CreateConfigParams,
    pub procedure: ProcedureParameters,
    pub timeouts: RangingTimeouts,
    /// Stop after this many estimates; `None` runs until the link is lost.
    pub max_estimates: Option<u32>,
}

impl SessionConfig {
    #[must_use]
    pub const fn initiator() -> Self {
        Self {
            role: Role::Initiator,
            default_settings: DefaultSettings::initiator(),
            create_config: CreateConfigParams::initiator(),
            procedure: ProcedureParameters::initiator(),
            timeouts: RangingTimeouts::DEFAULT,
            max_estimates: None,
        }
    }

    /// Reflector sessions only apply their default settings; the remaining
    /// fields are carried for completeness.
    #[must_use]
    pub const fn reflector() -> Self {
        Self {
            role: Role::Reflector,
            default_settings: DefaultSettings::reflector(),
            ..Self::initiator()
        }
    }

    /// Replaces the loop timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: RangingTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Bounds the number of estimates before the loop returns.
    #[must_use]
    pub const fn with_max_estimates(mut self, max_estimates: u32) -> Self {
        self.max_estimates = Some(max_estimates);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::initiator()
    }
}

/// Returns `true` for channels CS may use: 2..=76 minus the advertising
/// neighbourhood 23..=25.
#[must_use]
pub const fn is_valid_channel(channel: u8) -> bool {
    matches!(channel, 2..=22 | 26..=76)
}

/// Channel map with every valid CS channel enabled.
#[must_use]
pub const fn valid_channel_map() -> [u8; CHANNEL_MAP_LEN] {
    let mut map = [0u8; CHANNEL_MAP_LEN];
    let mut channel = 0u8;
    while (channel as usize) < CHANNEL_MAP_LEN * 8 {
        if is_valid_channel(channel) {
            map[(channel / 8) as usize] |= 1 << (channel % 8);
        }
        channel += 1;
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_set(map: &[u8; CHANNEL_MAP_LEN], channel: u8) -> bool {
        map[(channel / 8) as usize] & (1 << (channel % 8)) != 0
    }

    #[test]
    fn valid_map_excludes_reserved_channels() {
        let map = valid_channel_map();
        for channel in [0, 1, 23, 24, 25, 77, 78, 79] {
            assert!(!channel_set(&map, channel), "channel {channel} must be off");
        }
        for channel in [2, 22, 26, 40, 76] {
            assert!(channel_set(&map, channel), "channel {channel} must be on");
        }

        let enabled: u32 = map.iter().map(|byte| byte.count_ones()).sum();
        assert_eq!(enabled, 72);
    }

    #[test]
    fn initiator_preset_matches_controller_setup() {
        let config = SessionConfig::initiator();
        assert_eq!(config.role, Role::Initiator);
        assert!(config.default_settings.enable_initiator_role);
        assert!(!config.default_settings.enable_reflector_role);
        assert_eq!(config.create_config.min_main_mode_steps, 10);
        assert_eq!(config.create_config.max_main_mode_steps, 20);
        assert_eq!(config.procedure.max_procedure_count, 1);
        assert_eq!(config.procedure.max_subevent_len, 60_000);
        assert_eq!(config.timeouts.fetch, Duration::from_secs(5));
        assert!(config.timeouts.is_valid());
    }

    #[test]
    fn reflector_preset_only_enables_reflector_role() {
        let config = SessionConfig::reflector();
        assert_eq!(config.role, Role::Reflector);
        assert!(!config.default_settings.enable_initiator_role);
        assert!(config.default_settings.enable_reflector_role);
    }

    #[test]
    fn zero_timeouts_are_invalid() {
        let timeouts = RangingTimeouts {
            fetch: Duration::ZERO,
            ..RangingTimeouts::DEFAULT
        };
        assert!(!timeouts.is_valid());
    }
}
