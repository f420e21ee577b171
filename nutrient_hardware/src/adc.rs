//! MCP3008 10-bit SPI ADC driver, used to read the pH, EC and Vcc-divider
//! analog channels on real hardware.

use tracing::trace;

use crate::error::{HwError, Result};

/// One of the MCP3008's eight single-ended input channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcChannel(pub u8);

impl AdcChannel {
    pub const PH: AdcChannel = AdcChannel(0);
    pub const EC: AdcChannel = AdcChannel(1);
    pub const VCC: AdcChannel = AdcChannel(2);
}

pub struct Mcp3008 {
    spi: rppal::spi::Spi,
}

impl Mcp3008 {
    pub fn new(spi: rppal::spi::Spi) -> Self {
        Self { spi }
    }

    /// Read a single-ended channel, returning the raw 10-bit count (0..=1023).
    pub fn read_channel(&mut self, channel: AdcChannel) -> Result<u16> {
        if channel.0 > 7 {
            return Err(HwError::Spi(format!("channel {} out of range", channel.0)));
        }
        // MCP3008 protocol: start bit, single/diff bit, 3 channel-select
        // bits, packed into the top of a 3-byte exchange; the chip clocks
        // out a leading null bit followed by 10 data bits.
        let tx = [0x01, 0x80 | (channel.0 << 4), 0x00];
        let mut rx = [0u8; 3];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        let value = (u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2]);
        trace!(channel = channel.0, raw = value, "mcp3008 raw read");
        Ok(value)
    }
}
