use thiserror::Error;

#[derive(Error, Debug)]
pub enum SonicLinkError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("ECC error: {0}")]
    ErrorCorrection(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Modem engine failed to initialize: {0}")]
    EngineInit(String),

    #[error("Modem session is not available")]
    SessionUnavailable,

    #[error("Unknown modem instance {0}")]
    UnknownInstance(u32),

    #[error("Unsupported protocol id {0}")]
    UnsupportedProtocol(u8),

    #[error("Modem engine produced no waveform")]
    EncodeFailed,

    #[error("A transmission is already in progress")]
    TransmitBusy,

    #[error("Invalid image payload: {0}")]
    InvalidImage(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SonicLinkError>;
