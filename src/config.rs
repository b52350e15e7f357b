use serde::Serialize;
use std::time::Duration;

use crate::audio::AudioConfig;
use crate::controller::SessionConfig;

/// Upper bound on waiting for an audio thread to exit.
const AUDIO_STOP_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound on closing the network connection after a turn.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 音频设备配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub sample_rate: u32,
    pub capture_frame_samples: usize,
    pub playback_frame_samples: usize,
    pub capture_queue_capacity: usize,
    pub playback_queue_capacity: usize,
    pub playback_idle_timeout_ms: u64,
    pub playback_settle_ms: u64,

    // GUI进程配置
    pub gui_local_port: u16,
    pub gui_remote_port: u16,
    pub gui_local_ip: &'static str,
    pub gui_remote_ip: &'static str,

    // 网络配置（静态部分）
    pub ws_url: &'static str,
    pub ws_token: &'static str,

    // 设备标识（动态部分，可在运行时修改）
    pub device_id: String,
    pub client_id: String,

    // 会话参数
    pub max_runtime_secs: u64,
    pub volume_percentage: u8,
    pub status_capacity: usize,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            capture_frame_samples: env!("AUDIO_CAPTURE_FRAME_SAMPLES").parse()
                .map_err(|_| "Failed to parse AUDIO_CAPTURE_FRAME_SAMPLES")?,
            playback_frame_samples: env!("AUDIO_PLAYBACK_FRAME_SAMPLES").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_FRAME_SAMPLES")?,
            capture_queue_capacity: env!("AUDIO_CAPTURE_QUEUE_CAPACITY").parse()
                .map_err(|_| "Failed to parse AUDIO_CAPTURE_QUEUE_CAPACITY")?,
            playback_queue_capacity: env!("AUDIO_PLAYBACK_QUEUE_CAPACITY").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_QUEUE_CAPACITY")?,
            playback_idle_timeout_ms: env!("AUDIO_PLAYBACK_IDLE_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_IDLE_TIMEOUT_MS")?,
            playback_settle_ms: env!("AUDIO_PLAYBACK_SETTLE_MS").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_SETTLE_MS")?,

            gui_local_port: env!("GUI_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_port: env!("GUI_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
            gui_local_ip: env!("GUI_LOCAL_IP"),
            gui_remote_ip: env!("GUI_REMOTE_IP"),

            ws_url: env!("WS_URL"),
            ws_token: env!("WS_TOKEN"),

            // 设备标识初始化为config.toml中的值
            device_id: env!("DEVICE_ID").to_string(),
            client_id: env!("CLIENT_ID").to_string(),

            max_runtime_secs: env!("CONVERSATION_MAX_RUNTIME_SECS").parse()
                .map_err(|_| "Failed to parse CONVERSATION_MAX_RUNTIME_SECS")?,
            volume_percentage: env!("CONVERSATION_VOLUME_PERCENTAGE").parse()
                .map_err(|_| "Failed to parse CONVERSATION_VOLUME_PERCENTAGE")?,
            status_capacity: env!("CONVERSATION_STATUS_CAPACITY").parse()
                .map_err(|_| "Failed to parse CONVERSATION_STATUS_CAPACITY")?,
        })
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            capture_device: self.capture_device.to_string(),
            playback_device: self.playback_device.to_string(),
            sample_rate: self.sample_rate,
            capture_frame_samples: self.capture_frame_samples,
            playback_frame_samples: self.playback_frame_samples,
            capture_queue_capacity: self.capture_queue_capacity,
            playback_queue_capacity: self.playback_queue_capacity,
            playback_idle_timeout: Duration::from_millis(self.playback_idle_timeout_ms),
            playback_settle: Duration::from_millis(self.playback_settle_ms),
            stop_timeout: AUDIO_STOP_TIMEOUT,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_runtime: Duration::from_secs(self.max_runtime_secs),
            sample_rate: self.sample_rate,
            volume_percentage: self.volume_percentage.min(100),
            teardown_timeout: TEARDOWN_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_config_parses() {
        let config = Config::new().unwrap();
        assert!(config.sample_rate > 0);
        assert!(!config.ws_url.is_empty());
    }

    #[test]
    fn derived_configs_agree_on_sample_rate() {
        let config = Config::new().unwrap();
        let audio = config.audio_config();
        let session = config.session_config();
        assert_eq!(audio.sample_rate, session.sample_rate);
        assert_eq!(audio.playback_idle_timeout, Duration::from_millis(config.playback_idle_timeout_ms));
        assert!(session.volume_percentage <= 100);
    }

    #[test]
    fn status_bus_has_room_for_a_turn_of_events() {
        let config = Config::new().unwrap();
        assert!(config.status_capacity >= 32);
    }
}
