//! ---
//! ezmb_section: "04-field-io"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Opening serial devices and applying line parameters."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
//! Device open and line configuration.
//!
//! Devices are opened read/write without becoming the controlling terminal,
//! in raw mode with flow control disabled and a zero VMIN/VTIME line
//! discipline, so a read returns whatever is buffered. Waiting for data is
//! left to the [`crate::PortSet`] reader loop.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;
use std::time::Duration;

use ezmb_common::{DataBits, LineConfig, Parity, PortConfig, StopBits};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, SpecialCharacterIndices};
use serialport::{FlowControl, SerialPort, TTYPort};

use crate::error::{Result, SerialError};

fn to_serialport_data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn to_serialport_stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn to_serialport_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

/// Apply `line` to an already open device.
///
/// The baud rate was validated against the supported set when `line` was
/// built; a driver that still refuses it surfaces as [`SerialError::Open`].
pub fn configure(
    tty: &mut TTYPort,
    device: &Path,
    line: &LineConfig,
    timeout: Duration,
) -> Result<()> {
    let wrap = |source| SerialError::Open {
        device: device.to_path_buf(),
        source,
    };
    tty.set_baud_rate(line.baud.get()).map_err(wrap)?;
    tty.set_data_bits(to_serialport_data_bits(line.databits))
        .map_err(wrap)?;
    tty.set_parity(to_serialport_parity(line.parity))
        .map_err(wrap)?;
    tty.set_stop_bits(to_serialport_stop_bits(line.stopbits))
        .map_err(wrap)?;
    tty.set_flow_control(FlowControl::None).map_err(wrap)?;
    tty.set_timeout(timeout).map_err(wrap)?;
    Ok(())
}

/// Put the descriptor in non-blocking mode with VMIN=0 and VTIME=0.
///
/// Reads return whatever is buffered and writes may be short.
pub fn set_nonblocking(tty: &TTYPort, device: &Path) -> Result<()> {
    let wrap = |errno: Errno| SerialError::Open {
        device: device.to_path_buf(),
        source: serialport::Error::from(std::io::Error::from(errno)),
    };
    let raw = tty.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL).map_err(wrap)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(wrap)?;

    // SAFETY: `tty` owns the descriptor and outlives this borrow.
    let fd = unsafe { BorrowedFd::borrow_raw(raw) };
    let mut termios = tcgetattr(fd).map_err(wrap)?;
    termios.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    termios.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    tcsetattr(fd, SetArg::TCSANOW, &termios).map_err(wrap)?;
    Ok(())
}

/// Open and configure the device described by `config`.
///
/// Never retries; on failure the descriptor is dropped (closed) before
/// returning. Reconnection is the port set monitor's job.
pub fn open(config: &PortConfig) -> Result<TTYPort> {
    config.validate()?;
    let path = config.device.to_string_lossy();
    let mut tty = serialport::new(path, config.line.baud.get())
        .flow_control(FlowControl::None)
        .timeout(config.read_timeout())
        .open_native()
        .map_err(|source| SerialError::Open {
            device: config.device.clone(),
            source,
        })?;
    configure(&mut tty, &config.device, &config.line, config.read_timeout())?;
    set_nonblocking(&tty, &config.device)?;
    Ok(tty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn conversions_cover_every_variant() {
        assert_eq!(
            to_serialport_data_bits(DataBits::Seven),
            serialport::DataBits::Seven
        );
        assert_eq!(to_serialport_stop_bits(StopBits::Two), serialport::StopBits::Two);
        assert_eq!(to_serialport_parity(Parity::Odd), serialport::Parity::Odd);
    }

    #[test]
    fn open_missing_device_fails() {
        let config = PortConfig::new("U1", "/dev/ezmb-does-not-exist");
        assert!(matches!(open(&config), Err(SerialError::Open { .. })));
    }

    #[test]
    fn open_rejects_invalid_descriptor_before_touching_device() {
        let config = PortConfig::new("U1", "/dev/ezmb-does-not-exist").with_maxlen(0);
        assert!(matches!(open(&config), Err(SerialError::ConfigInvalid(_))));
    }

    #[test]
    fn open_pty_applies_line_and_passes_bytes() {
        let (mut master, slave) = TTYPort::pair().expect("pty pair");
        let device = slave.name().expect("slave name");
        drop(slave);

        let line = LineConfig {
            baud: ezmb_common::BaudRate::new(9_600).unwrap(),
            ..LineConfig::default()
        };
        let config = PortConfig::new("U1", device).with_line(line);
        let mut tty = open(&config).unwrap();
        assert_eq!(tty.data_bits().unwrap(), serialport::DataBits::Eight);

        master.write_all(b"ping").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let mut buf = [0u8; 16];
        let n = tty.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn opened_descriptor_does_not_block() {
        let (_master, slave) = TTYPort::pair().expect("pty pair");
        let device = slave.name().expect("slave name");
        drop(slave);

        let tty = open(&PortConfig::new("U1", device)).unwrap();
        let raw = tty.as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL).unwrap());
        assert!(flags.contains(OFlag::O_NONBLOCK));

        let termios = tcgetattr(unsafe { BorrowedFd::borrow_raw(raw) }).unwrap();
        assert_eq!(termios.control_chars[SpecialCharacterIndices::VMIN as usize], 0);
        assert_eq!(termios.control_chars[SpecialCharacterIndices::VTIME as usize], 0);
    }
}
