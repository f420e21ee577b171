//! I2C EEPROM backing store (24LC256-class device) for the persisted config
//! record.

use std::time::Duration;

use tracing::trace;

use crate::error::{HwError, Result};
use crate::util::wait_until_ready_with_timeout;
use nutrient_traits::clock::Clock;

const PAGE_SIZE: usize = 64;
const WRITE_TIMEOUT: Duration = Duration::from_millis(10);
const WRITE_POLL_INTERVAL: Duration = Duration::from_micros(500);

pub struct I2cEeprom {
    i2c: rppal::i2c::I2c,
    clock: Box<dyn Clock + Send>,
}

impl I2cEeprom {
    pub fn new(mut i2c: rppal::i2c::I2c, address: u16, clock: Box<dyn Clock + Send>) -> Result<Self> {
        i2c.set_slave_address(address)
            .map_err(|e| HwError::I2c(e.to_string()))?;
        Ok(Self { i2c, clock })
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let addr_bytes = [0u8, 0u8];
        self.i2c
            .write_read(&addr_bytes, buf)
            .map_err(|e| HwError::I2c(e.to_string()))?;
        trace!(len = buf.len(), "eeprom read");
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        for (page_index, chunk) in data.chunks(PAGE_SIZE).enumerate() {
            let offset = page_index * PAGE_SIZE;
            let mut frame = Vec::with_capacity(2 + chunk.len());
            frame.push((offset >> 8) as u8);
            frame.push((offset & 0xff) as u8);
            frame.extend_from_slice(chunk);
            self.i2c
                .write(&frame)
                .map_err(|e| HwError::I2c(e.to_string()))?;
            self.wait_write_complete()?;
        }
        trace!(len = data.len(), "eeprom write");
        Ok(())
    }

    fn wait_write_complete(&mut self) -> Result<()> {
        let clock = self.clock.as_ref();
        wait_until_ready_with_timeout(
            || self.i2c.write(&[0u8]).is_err(),
            WRITE_TIMEOUT,
            WRITE_POLL_INTERVAL,
            clock,
        )
    }
}
