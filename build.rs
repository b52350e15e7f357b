use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    gui: Gui,
    network: Network,
    conversation: Conversation,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    sample_rate: u32,
    capture_frame_samples: usize,
    playback_frame_samples: usize,
    capture_queue_capacity: usize,
    playback_queue_capacity: usize,
    playback_idle_timeout_ms: u64,
    playback_settle_ms: u64,
}

#[derive(Deserialize)]
struct Gui {
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    ws_token: String,
    device_id: String,
    client_id: String,
}

#[derive(Deserialize)]
struct Conversation {
    max_runtime_secs: u64,
    volume_percentage: u8,
    status_capacity: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CAPTURE_FRAME_SAMPLES={}", config.audio.capture_frame_samples);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_FRAME_SAMPLES={}", config.audio.playback_frame_samples);
    println!("cargo:rustc-env=AUDIO_CAPTURE_QUEUE_CAPACITY={}", config.audio.capture_queue_capacity);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_QUEUE_CAPACITY={}", config.audio.playback_queue_capacity);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_IDLE_TIMEOUT_MS={}", config.audio.playback_idle_timeout_ms);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_SETTLE_MS={}", config.audio.playback_settle_ms);

    // GUI 配置
    println!("cargo:rustc-env=GUI_LOCAL_IP={}", config.gui.local_ip);
    println!("cargo:rustc-env=GUI_LOCAL_PORT={}", config.gui.local_port);
    println!("cargo:rustc-env=GUI_REMOTE_IP={}", config.gui.remote_ip);
    println!("cargo:rustc-env=GUI_REMOTE_PORT={}", config.gui.remote_port);

    // 网络配置
    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);
    println!("cargo:rustc-env=WS_TOKEN={}", config.network.ws_token);
    println!("cargo:rustc-env=DEVICE_ID={}", config.network.device_id);
    println!("cargo:rustc-env=CLIENT_ID={}", config.network.client_id);

    // 会话配置
    println!("cargo:rustc-env=CONVERSATION_MAX_RUNTIME_SECS={}", config.conversation.max_runtime_secs);
    println!("cargo:rustc-env=CONVERSATION_VOLUME_PERCENTAGE={}", config.conversation.volume_percentage);
    println!("cargo:rustc-env=CONVERSATION_STATUS_CAPACITY={}", config.conversation.status_capacity);
}
