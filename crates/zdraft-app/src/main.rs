//! ZDraft 命令行入口
//!
//! 用法：
//!     zdraft demo room.json
//!     zdraft --config engine.json solve room.json solved.json

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use zdraft_core::prelude::*;

/// ZDraft - 墙体绘制与约束求解
#[derive(Parser)]
#[command(name = "zdraft")]
#[command(version)]
#[command(about = "Wall drafting and constraint solving", long_about = None)]
struct Cli {
    /// 引擎配置文件（JSON）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 绘制示例房间，求解后保存
    Demo {
        /// 输出文件
        out: PathBuf,
    },

    /// 加载文档并求解约束
    Solve {
        /// 输入文件
        input: PathBuf,

        /// 输出文件（可选）
        output: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = EngineConfig::from_json_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// 画一个 5m x 4m 的房间，再加一组距离和垂直约束
async fn cmd_demo(config: EngineConfig, out: &Path) -> Result<()> {
    let mut engine = DraftingEngine::new(config);

    let drawer = engine.drawer_mut();
    drawer.start_drawing(Point2::new(0.0, 0.0));
    for (x, y) in [(5.0, 0.0), (5.0, 4.0), (0.0, 4.0), (0.0, 0.0)] {
        if let SegmentOutcome::Rejected { length } =
            drawer.finish_wall_segment(Some(Point2::new(x, y)))?
        {
            warn!("Demo wall of length {:.3} was rejected", length);
        }
    }
    let walls = drawer.finish_drawing();
    info!("Demo room drawn with {} walls", walls);

    let store = engine.store_mut();
    let a = store.create_entity(EntityGeometry::Point {
        position: Point3::new(1.0, 1.0, 0.0),
    });
    let b = store.create_entity(EntityGeometry::Point {
        position: Point3::new(4.0, 1.0, 0.0),
    });
    store.add_constraint(constraints::distance(a.id, b.id, 2.0));

    let l1 = store.create_entity(EntityGeometry::Line {
        start: Point3::new(1.0, 2.0, 0.0),
        end: Point3::new(4.0, 2.0, 0.0),
    });
    let l2 = store.create_entity(EntityGeometry::Line {
        start: Point3::new(2.0, 1.5, 0.0),
        end: Point3::new(2.5, 3.5, 0.0),
    });
    store.add_constraint(constraints::fixed(l1.id).with_priority(10));
    store.add_constraint(constraints::perpendicular(l1.id, l2.id));

    let options = engine.config().solver.clone();
    let report = engine.store_mut().solve(&options).await;
    print_report(&report)?;

    zdraft_file::save(&engine, out)?;
    Ok(())
}

async fn cmd_solve(config: EngineConfig, input: &Path, output: Option<&Path>) -> Result<()> {
    let mut engine = DraftingEngine::new(config);
    zdraft_file::load(&mut engine, input)
        .with_context(|| format!("loading {}", input.display()))?;

    let validation = engine.store().validate();
    if !validation.valid {
        warn!("Document has {} constraint issues", validation.issues.len());
        println!("{}", serde_json::to_string_pretty(&validation)?);
    }

    let options = engine.config().solver.clone();
    let report = engine.store_mut().solve(&options).await;
    print_report(&report)?;

    if let Some(output) = output {
        zdraft_file::save(&engine, output)?;
    }
    Ok(())
}

fn print_report(report: &SolveReport) -> Result<()> {
    println!(
        "converged: {}  iterations: {}  violated: {:?}",
        report.converged, report.iterations, report.violated_constraint_ids
    );
    println!("{}", serde_json::to_string_pretty(&report.constraints)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing::subscriber::set_global_default(FmtSubscriber::builder().with_max_level(level).finish())?;

    info!("Starting ZDraft...");

    let config = load_config(cli.config.as_deref())?;

    // 核心是单线程的，使用当前线程运行时
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Demo { out } => cmd_demo(config, &out).await,
            Commands::Solve { input, output } => cmd_solve(config, &input, output.as_deref()).await,
        }
    })
}
