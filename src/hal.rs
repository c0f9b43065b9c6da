//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     the I2C bus the gas sensor hangs off. abstracts away the difference
//!     between running on a real Raspberry Pi (using `rppal`) and a
//!     development machine (using a mock bus).
//!
//! relationships:
//!     - used by: sensors.rs (Sgp30GasSensor)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use anyhow::Result;

pub trait I2cBus: Send {
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<()>;
    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<()>;
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For development machines and tests)
// ==============================================================================================

/// records every write and answers reads from a scripted reply
#[derive(Default)]
pub struct MockI2cBus {
    pub writes: Vec<(u8, Vec<u8>)>,
    reply: Vec<u8>,
    fail_reads: bool,
}

impl MockI2cBus {
    pub fn with_reply(reply: &[u8]) -> Self {
        tracing::info!("Using MOCK I2C bus (No hardware access)");
        Self { reply: reply.to_vec(), ..Self::default() }
    }

    #[cfg(test)]
    pub fn set_reply(&mut self, reply: &[u8]) {
        self.reply = reply.to_vec();
    }

    #[cfg(test)]
    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }
}

impl I2cBus for MockI2cBus {
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        tracing::debug!("[MOCK I2C] Addr: 0x{:02X}, Write: {:?}", addr, data);
        self.writes.push((addr, data.to_vec()));
        Ok(())
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<()> {
        if self.fail_reads {
            anyhow::bail!("mock read failure at 0x{:02X}", addr);
        }
        tracing::debug!("[MOCK I2C] Addr: 0x{:02X}, ReadLen: {}", addr, buf.len());
        for (dst, src) in buf.iter_mut().zip(self.reply.iter().chain(std::iter::repeat(&0))) {
            *dst = *src;
        }
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct RppalI2cBus {
    i2c: rppal::i2c::I2c,
    current_addr: Option<u8>,
}

#[cfg(feature = "hardware")]
impl RppalI2cBus {
    pub fn new() -> Result<Self> {
        tracing::info!("Using REAL HARDWARE I2C bus (rppal)");
        Ok(Self { i2c: rppal::i2c::I2c::new()?, current_addr: None })
    }

    fn select(&mut self, addr: u8) -> Result<()> {
        if self.current_addr != Some(addr) {
            self.i2c.set_slave_address(addr as u16)?;
            self.current_addr = Some(addr);
        }
        Ok(())
    }
}

#[cfg(feature = "hardware")]
impl I2cBus for RppalI2cBus {
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        self.select(addr)?;
        self.i2c.write(data)?;
        Ok(())
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<()> {
        self.select(addr)?;
        self.i2c.read(buf)?;
        Ok(())
    }
}
