use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("spi error: {0}")]
    Spi(String),
    #[error("i2c error: {0}")]
    I2c(String),
    #[error("adc conversion timeout")]
    Timeout,
    #[error("eeprom write-cycle timeout")]
    WriteTimeout,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
