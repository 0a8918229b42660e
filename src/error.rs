use thiserror::Error;

/// クレート全体で使うエラー型。
///
/// 数値計算の中核（損失関数・予測）は入力が正しい前提で動き、
/// ここに現れるのは周辺の入出力・検証・状態管理の失敗だけです。
#[derive(Debug, Error)]
pub enum PinnError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model record error: {0}")]
    Record(#[from] burn::record::RecorderError),

    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("missing field `{0}` for the selected mode")]
    MissingField(&'static str),

    #[error("loss reference is already set to {0}")]
    AlreadyCalibrated(f32),
}

pub type Result<T> = std::result::Result<T, PinnError>;
