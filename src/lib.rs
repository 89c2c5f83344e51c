// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Boot command typing for virtual machine builders
//!
//! A boot command such as `<esc><wait>linux ks=http://10.0.2.2/ks.cfg<enter>`
//! is parsed into an [`ExpressionSequence`] and typed into a guest through a
//! [`BootDriver`]: VNC keysyms, USB HID usage codes or PC-XT scancodes.
//!
//! The crate also reads the host-side VMware network files (`dhcpd.conf`,
//! `netmap.conf`, Fusion's `networking` and the DHCP lease databases) used to
//! find a guest's address once it has booted.

pub mod config;
pub mod dhcp;
pub mod driver;
pub mod duration;
pub mod error;
pub mod leases;
pub mod netmap;
pub mod networking;
pub mod parser;
pub mod pcxt;
pub mod playback;
pub mod scan;
pub mod types;
pub mod usb;
pub mod vnc;

pub use config::{BootConfig, DriverKind};
pub use driver::{BootDriver, Pacing};
pub use error::{Error, ParseError, Result};
pub use parser::parse;
pub use pcxt::PcXtDriver;
pub use playback::PlaybackEngine;
pub use types::{Expression, ExpressionSequence, KeyAction};
pub use usb::UsbDriver;
pub use vnc::VncDriver;
