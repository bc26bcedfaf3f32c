use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use myy_sync::player::{FileInput, Player};
use myy_sync::PlayerConfig;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// 播放一个 packet-log 文件，打印播放时间和字幕
#[derive(Parser, Debug)]
#[command(name = "myy_sync")]
#[command(version)]
struct Args {
    /// 输入文件
    input: PathBuf,

    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 音量（0-1）
    #[arg(long)]
    volume: Option<f64>,

    /// 开始前 Seek 到的比例（0-1）
    #[arg(long)]
    seek: Option<f64>,
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let config = match args.config.as_deref() {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };

    info!("🎬 MYY Sync 启动: {}", args.input.display());
    let mut player = Player::new(config);
    player.set_input_source(Box::new(FileInput::open(&args.input)?))?;
    if let Some(volume) = args.volume {
        player.set_volume(volume);
    }
    if let Some(fraction) = args.seek {
        player.seek_fraction(fraction)?;
    }
    player.start()?;

    while !player.is_eof() {
        thread::sleep(Duration::from_millis(500));
        let time = player.time().unwrap_or(0.0);
        match player.end_time() {
            Some(end) => info!("⏱️  {:.2} / {:.2}s", time, end),
            None => info!("⏱️  {:.2}s", time),
        }
        for line in player.subtitles() {
            info!("💬 {}", line);
        }
    }

    player.stop();
    if let Some(e) = player.take_error() {
        return Err(e).context("播放失败");
    }
    info!("✅ 播放完成");
    Ok(())
}
