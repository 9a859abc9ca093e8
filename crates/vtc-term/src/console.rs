//! Linux console device access.
//!
//! On the Linux text console the terminal context inspects the loaded
//! screen font and unicode map through console ioctls, feeding the
//! PC-charset decision of the encoding manager. Both buffers are read
//! out in full at startup and written back at shutdown, so a session
//! leaves the console exactly as it found it. Off the console (or
//! without privileges) every call degrades silently; the feature is
//! simply absent.
//!
//! The device node is found by trying a fixed list of well-known paths
//! and verifying each candidate actually is a console via the keyboard
//! type ioctl.

use std::fs::File;
use std::os::fd::AsRawFd;

/// Fallback order of console device nodes.
const CONSOLE_PATHS: [&str; 5] = [
    "/dev/tty",
    "/dev/tty0",
    "/dev/vc/0",
    "/dev/systty",
    "/dev/console",
];

const KDGKBTYPE: libc::c_ulong = 0x4B33;
const KB_84: libc::c_char = 0x01;
const KB_101: libc::c_char = 0x02;

const KDFONTOP: libc::c_ulong = 0x4B72;
const KD_FONT_OP_SET: u32 = 0;
const KD_FONT_OP_GET: u32 = 1;

const GIO_UNIMAP: libc::c_ulong = 0x4B66;
const PIO_UNIMAP: libc::c_ulong = 0x4B67;
const PIO_UNIMAPCLR: libc::c_ulong = 0x4B68;

/// Glyph buffer sizing for KDFONTOP: the kernel stores each glyph in 32
/// padded scanlines of up to 32 pixels, 512 glyphs at most.
const FONT_BUFFER_SIZE: usize = 4 * 32 * 512;

#[repr(C)]
struct ConsoleFontOp {
    op: u32,
    flags: u32,
    width: u32,
    height: u32,
    charcount: u32,
    data: *mut u8,
}

/// One unicode-to-glyph mapping entry of the console map.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniPair {
    pub unicode: u16,
    pub fontpos: u16,
}

#[repr(C)]
struct UniMapDesc {
    entry_ct: u16,
    entries: *mut UniPair,
}

#[repr(C)]
struct UniMapInit {
    advised_hashsize: u16,
    advised_hashstep: u16,
    advised_hashlevel: u16,
}

/// A screen font read from the console, glyph data included.
#[derive(Debug, Clone)]
pub struct ScreenFont {
    pub width: u32,
    pub height: u32,
    pub charcount: u32,
    data: Vec<u8>,
}

/// Screen font geometry as the console reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontInfo {
    pub width: u32,
    pub height: u32,
    pub charcount: u32,
}

/// An open, verified console device.
#[derive(Debug)]
pub struct Console {
    file: File,
}

impl Console {
    /// Open the first path that answers the keyboard-type ioctl like a
    /// console. `None` anywhere else (X terminal, ssh, no privileges).
    pub fn open() -> Option<Self> {
        for path in CONSOLE_PATHS {
            let Ok(file) = File::options().read(true).write(true).open(path) else {
                continue;
            };
            let mut kb_type: libc::c_char = 0;
            // SAFETY: KDGKBTYPE writes one byte into kb_type.
            let rc = unsafe { libc::ioctl(file.as_raw_fd(), KDGKBTYPE, &mut kb_type) };
            if rc == 0 && (kb_type == KB_101 || kb_type == KB_84) {
                vtc_core::debug!(path, "console device opened");
                return Some(Self { file });
            }
        }
        None
    }

    /// Read the loaded screen font, glyph data and all.
    pub fn read_font(&self) -> Option<ScreenFont> {
        let mut data = vec![0u8; FONT_BUFFER_SIZE];
        let mut op = ConsoleFontOp {
            op: KD_FONT_OP_GET,
            flags: 0,
            width: 32,
            height: 32,
            charcount: 512,
            data: data.as_mut_ptr(),
        };
        // SAFETY: the buffer covers the largest font the kernel stores;
        // KDFONTOP shrinks the requested geometry to the actual one.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), KDFONTOP, &mut op) };
        (rc == 0).then_some(ScreenFont {
            width: op.width,
            height: op.height,
            charcount: op.charcount,
            data,
        })
    }

    /// Load a screen font previously read with [`read_font`](Self::read_font).
    pub fn write_font(&self, font: &ScreenFont) -> bool {
        let mut data = font.data.clone();
        let mut op = ConsoleFontOp {
            op: KD_FONT_OP_SET,
            flags: 0,
            width: font.width,
            height: font.height,
            charcount: font.charcount,
            data: data.as_mut_ptr(),
        };
        // SAFETY: the data buffer matches the sizing KDFONTOP filled it
        // with on the way out.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), KDFONTOP, &mut op) };
        rc == 0
    }

    /// Geometry of the loaded screen font, without copying its glyphs.
    pub fn font(&self) -> Option<FontInfo> {
        let mut op = ConsoleFontOp {
            op: KD_FONT_OP_GET,
            flags: 0,
            width: 0,
            height: 0,
            // asking for zero glyphs still fills in the geometry
            charcount: 0,
            data: std::ptr::null_mut(),
        };
        // SAFETY: KDFONTOP with a null data pointer only queries.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), KDFONTOP, &mut op) };
        (rc == 0 || last_errno() == libc::ENOMEM).then_some(FontInfo {
            width: op.width,
            height: op.height,
            charcount: op.charcount,
        })
    }

    /// Number of entries in the screen unicode map. Zero means the
    /// console cannot translate Unicode at all (straight-to-font mode).
    pub fn unicode_map_len(&self) -> Option<u16> {
        let mut desc = UniMapDesc {
            entry_ct: 0,
            entries: std::ptr::null_mut(),
        };
        // SAFETY: with entry_ct 0 the kernel only reports the count
        // (ENOMEM) or an empty map (success).
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), GIO_UNIMAP, &mut desc) };
        if rc == 0 || last_errno() == libc::ENOMEM {
            Some(desc.entry_ct)
        } else {
            None
        }
    }

    /// Read the full unicode-to-glyph map.
    pub fn read_unicode_map(&self) -> Option<Vec<UniPair>> {
        let count = self.unicode_map_len()?;
        if count == 0 {
            return Some(Vec::new());
        }
        let mut entries = vec![
            UniPair {
                unicode: 0,
                fontpos: 0,
            };
            count as usize
        ];
        let mut desc = UniMapDesc {
            entry_ct: count,
            entries: entries.as_mut_ptr(),
        };
        // SAFETY: entries holds entry_ct elements; the kernel fills at
        // most that many and writes the real count back.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), GIO_UNIMAP, &mut desc) };
        if rc != 0 {
            return None;
        }
        entries.truncate(desc.entry_ct as usize);
        Some(entries)
    }

    /// Load a unicode map previously read with
    /// [`read_unicode_map`](Self::read_unicode_map). The kernel hash
    /// table is cleared first and regrown on ENOMEM.
    pub fn write_unicode_map(&self, entries: &[UniPair]) -> bool {
        let mut advice = UniMapInit {
            advised_hashsize: 0,
            advised_hashstep: 0,
            advised_hashlevel: 0,
        };
        let mut desc = UniMapDesc {
            entry_ct: entries.len().min(u16::MAX as usize) as u16,
            entries: entries.as_ptr().cast_mut(),
        };
        loop {
            // SAFETY: PIO_UNIMAPCLR reads the advice struct; PIO_UNIMAP
            // only reads the entry array.
            let rc = unsafe {
                if libc::ioctl(self.file.as_raw_fd(), PIO_UNIMAPCLR, &mut advice) != 0 {
                    return false;
                }
                libc::ioctl(self.file.as_raw_fd(), PIO_UNIMAP, &mut desc)
            };
            if rc == 0 {
                return true;
            }
            if last_errno() != libc::ENOMEM || advice.advised_hashlevel >= 100 {
                return false;
            }
            advice.advised_hashlevel += 1;
        }
    }

    /// True when a non-standard font is loaded (512-glyph fonts replace
    /// the upper charset half, so the PC charset mapping applies).
    pub fn has_custom_font(&self) -> bool {
        self.font().is_some_and(|f| f.charcount > 256)
    }
}

/// Console state captured at startup and written back at shutdown.
///
/// Holds the device open for the life of the session so the restore
/// targets the same console the snapshot came from.
#[derive(Debug)]
pub struct ConsoleGuard {
    console: Console,
    saved_font: Option<ScreenFont>,
    saved_map: Option<Vec<UniPair>>,
}

impl ConsoleGuard {
    /// Open the console and snapshot its font and unicode map. `None`
    /// off-console; a console without a readable font or map still
    /// yields a guard with the missing piece absent.
    pub fn acquire() -> Option<Self> {
        let console = Console::open()?;
        let saved_font = console.read_font();
        let saved_map = console.read_unicode_map();
        vtc_core::debug!(
            font = saved_font.is_some(),
            map_entries = saved_map.as_ref().map_or(0, Vec::len),
            "console state saved"
        );
        Some(Self {
            console,
            saved_font,
            saved_map,
        })
    }

    /// The saved unicode-to-glyph map, when the console has one.
    pub fn unicode_map(&self) -> Option<&[UniPair]> {
        self.saved_map.as_deref()
    }

    /// True when the saved font replaces the standard 256-glyph charset.
    pub fn has_custom_font(&self) -> bool {
        match &self.saved_font {
            Some(font) => font.charcount > 256,
            None => self.console.has_custom_font(),
        }
    }

    /// Write the saved font and unicode map back, best effort.
    pub fn restore(&self) {
        if let Some(font) = &self.saved_font {
            let _ = self.console.write_font(font);
        }
        if let Some(map) = &self.saved_map {
            if !map.is_empty() {
                let _ = self.console.write_unicode_map(map);
            }
        }
        vtc_core::debug!("console state restored");
    }
}

fn last_errno() -> libc::c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
