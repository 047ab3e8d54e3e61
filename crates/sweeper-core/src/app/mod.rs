//! App - アプリケーション層
//!
//! このモジュールは、ports と domain を組み合わせてスイープループを実装します。
//!
//! # 主要コンポーネント
//! - **SweepLoopBuilder**: 設定とワイヤリング
//! - **SweepConfig**: 環境変数からの設定
//! - **SweepLoop**: connect → consume → 判定 → ack/requeue → close
//! - **CycleDetector**: キューを一周したかの判定
//! - **IdleTimeoutGuard**: 配送が途絶えたことの検出
//! - **DispositionEngine**: 判定結果を ack / requeue に変換

pub mod builder;
pub mod config;
pub mod cycle;
pub mod disposition;
pub mod idle;
pub mod sweep_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, SweepLoopBuilder};
pub use self::config::{ConfigError, SweepConfig};
pub use self::cycle::CycleDetector;
pub use self::disposition::{Disposition, DispositionEngine};
pub use self::idle::IdleTimeoutGuard;
pub use self::sweep_loop::SweepLoop;
