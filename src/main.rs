use anyhow::Result;
use hls_playback::core::{PlayerConfig, SubtitleCue, SurfaceHandle};
use hls_playback::player::sim::{CallLog, SimCache, SimCatalog, SimDecoder, SimLoader};
use hls_playback::player::{
    Collaborators, EventKind, JsonFileStore, PlaybackSession, PlayerEvent, StateStore,
};
use log::{info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 演示：用内存模拟协作者跑一遍完整的播放流程
///
/// 用法：hls-playback-demo [config.json] [state.json]
fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 HLS 播放控制核心演示启动");

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => {
            info!("📄 加载配置: {}", path);
            PlayerConfig::from_json_file(&path)?
        }
        None => PlayerConfig::default(),
    };
    let state_path = args
        .next()
        .unwrap_or_else(|| std::env::temp_dir().join("hls-playback-state.json").display().to_string());

    let log = CallLog::default();
    let catalog = SimCatalog::vod(log.clone(), 6, 6.0)
        .with_qualities(3)
        .with_audio(vec!["中文".to_string(), "English".to_string()])
        .with_subtitles(vec!["zh".to_string(), "en".to_string()], Some(0))
        .with_cue(
            0,
            SubtitleCue {
                start_time: 0.2,
                duration: 2.0,
                alignment: "center".to_string(),
                text: "喜洋洋".to_string(),
            },
        );
    let decoder = Arc::new(SimDecoder::new(log.clone()));
    let collaborators = Collaborators {
        decoder: decoder.clone(),
        cache: Arc::new(SimCache::new(log.clone())),
        loader: Arc::new(SimLoader::serving(log.clone(), Arc::new(catalog))),
    };

    let mut session = PlaybackSession::new(collaborators, config)?;
    session.subscribe(|event| match event {
        PlayerEvent::PlayheadUpdate(_) => {}
        PlayerEvent::Error {
            code,
            message,
            fatal,
        } => warn!("❗ 错误 {:?} (fatal={}): {}", code, fatal, message),
        other => info!("📣 事件: {:?}", other),
    });
    session.subscribe_kind(EventKind::SubtitleText, |event| {
        if let PlayerEvent::SubtitleText(cue) = event {
            info!("💬 字幕: {}", cue.text);
        }
    });

    let mut presentation = session.spawn_presentation_thread()?;
    session.bind_surface(SurfaceHandle(1));

    session.set_url("https://example.com/master.m3u8");
    session.play();
    thread::sleep(Duration::from_millis(500));

    session.switch_quality(2);
    // 演示里没有真正的解码器回调，直接模拟格式切换完成
    session.native_callbacks().notify_format_change_complete(2);
    session.switch_audio(1, true);
    session.switch_subtitle(1);
    session.seek(12_000);
    thread::sleep(Duration::from_millis(300));

    session.pause();
    thread::sleep(Duration::from_millis(100));
    info!(
        "⏱ 位置 {}ms / 总时长 {:?}ms，清晰度 {}，音轨 {}，字幕 {}",
        session.current_position_ms(),
        session.duration_ms(),
        session.current_quality_index(),
        session.current_audio_index(),
        session.current_subtitle_index()
    );

    let store = JsonFileStore::new(&state_path);
    session.release(&store)?;
    presentation.stop();

    if let Some(saved) = store.load()? {
        info!("💾 已保存的播放现场: {:?}", saved);
    }
    info!("🧾 解码器共调用 {} 次 feed", log.count_prefix("decoder.feed"));
    info!("✅ 演示结束");
    Ok(())
}
