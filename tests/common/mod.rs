//! Shared test utilities for integration tests.
//!
//! Builders for small in-memory archives of every supported format. Each
//! builder takes `(path, data)` pairs and writes only the fields the readers
//! look at.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::io::Write;

/// File entries used by most builders.
pub type Files<'a> = [(&'a str, &'a [u8])];

fn fixed(name: &str, width: usize) -> Vec<u8> {
    let mut field = vec![0u8; width];
    field[..name.len()].copy_from_slice(name.as_bytes());
    field
}

// =============================================================================
// Flat table formats
// =============================================================================

/// Build engine GRP: names are at most 12 bytes.
pub fn grp(files: &Files<'_>) -> Vec<u8> {
    let mut out = b"KenSilverman".to_vec();
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    for (name, data) in files {
        out.extend_from_slice(&fixed(name, 12));
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    }
    for (_, data) in files {
        out.extend_from_slice(data);
    }
    out
}

/// Doom PWAD: lump names are at most 8 bytes.
pub fn wad(files: &Files<'_>) -> Vec<u8> {
    let mut data = Vec::new();
    let mut dir = Vec::new();
    for (name, content) in files {
        dir.extend_from_slice(&(12 + data.len() as u32).to_le_bytes());
        dir.extend_from_slice(&(content.len() as u32).to_le_bytes());
        dir.extend_from_slice(&fixed(name, 8));
        data.extend_from_slice(content);
    }
    let mut out = b"PWAD".to_vec();
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    out.extend_from_slice(&(12 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&dir);
    out
}

/// Quake PACK: paths may contain `/`.
pub fn qpak(files: &Files<'_>) -> Vec<u8> {
    let mut data = Vec::new();
    let mut dir = Vec::new();
    for (name, content) in files {
        let offset = 12 + data.len() as u32;
        data.extend_from_slice(content);
        dir.extend_from_slice(&fixed(name, 56));
        dir.extend_from_slice(&offset.to_le_bytes());
        dir.extend_from_slice(&(content.len() as u32).to_le_bytes());
    }
    let mut out = b"PACK".to_vec();
    out.extend_from_slice(&(12 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(dir.len() as u32).to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&dir);
    out
}

/// Descent I HOG (DHF).
pub fn hog(files: &Files<'_>) -> Vec<u8> {
    let mut out = b"DHF".to_vec();
    for (name, data) in files {
        out.extend_from_slice(&fixed(name, 13));
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

/// Descent II MVL.
pub fn mvl(files: &Files<'_>) -> Vec<u8> {
    let mut out = b"DMVL".to_vec();
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    for (name, data) in files {
        out.extend_from_slice(&fixed(name, 13));
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    }
    for (_, data) in files {
        out.extend_from_slice(data);
    }
    out
}

/// Independence War SLB: `/` in names is written as `\`.
pub fn slb(files: &Files<'_>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    let data_len: usize = files.iter().map(|(_, d)| d.len()).sum();
    out.extend_from_slice(&(12 + data_len as u32).to_le_bytes());
    let mut offsets = Vec::new();
    for (_, data) in files {
        offsets.push(out.len() as u32);
        out.extend_from_slice(data);
    }
    for ((name, data), offset) in files.iter().zip(offsets) {
        let mut field = vec![0u8; 64];
        field[0] = b'\\';
        field[1..1 + name.len()].copy_from_slice(name.replace('/', "\\").as_bytes());
        out.extend_from_slice(&field);
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    }
    out
}

/// Gothic VDF with a flat root catalog.
pub fn vdf(files: &Files<'_>) -> Vec<u8> {
    const HEADER_SIZE: u32 = 256 + 16 + 24;
    const TYPE_LAST: u32 = 0x4000_0000;
    let data_base = HEADER_SIZE + files.len() as u32 * 80;
    let data_len: usize = files.iter().map(|(_, d)| d.len()).sum();

    let mut out = vec![b' '; 256];
    out.extend_from_slice(b"PSVDSC_V2.00\r\n\r\n");
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(data_len as u32).to_le_bytes());
    out.extend_from_slice(&HEADER_SIZE.to_le_bytes());
    out.extend_from_slice(&0x50u32.to_le_bytes());
    let mut offset = data_base;
    for (i, (name, data)) in files.iter().enumerate() {
        let mut field = vec![b' '; 64];
        field[..name.len()].copy_from_slice(name.as_bytes());
        out.extend_from_slice(&field);
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        let kind = if i + 1 == files.len() { TYPE_LAST } else { 0 };
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        offset += data.len() as u32;
    }
    for (_, data) in files {
        out.extend_from_slice(data);
    }
    out
}

// =============================================================================
// ISO9660
// =============================================================================

const SECTOR: usize = 2048;

fn iso_record(name: &[u8], extent: u32, len: u32, dir: bool) -> Vec<u8> {
    let mut rec = vec![0u8; 33];
    rec[2..6].copy_from_slice(&extent.to_le_bytes());
    rec[6..10].copy_from_slice(&extent.to_be_bytes());
    rec[10..14].copy_from_slice(&len.to_le_bytes());
    rec[14..18].copy_from_slice(&len.to_be_bytes());
    rec[18..25].copy_from_slice(&[120, 6, 15, 12, 0, 0, 0]);
    rec[25] = if dir { 0x02 } else { 0 };
    rec[32] = name.len() as u8;
    rec.extend_from_slice(name);
    if rec.len() % 2 == 1 {
        rec.push(0);
    }
    rec[0] = rec.len() as u8;
    rec
}

/// An ISO9660 image without Joliet: files at the root plus at most one
/// level of subdirectories. Names are stored upper-case with `;1`.
pub fn iso(files: &Files<'_>) -> Vec<u8> {
    // Group files by directory ("" for the root).
    let mut dirs: Vec<(String, Vec<(String, &[u8])>)> = vec![(String::new(), Vec::new())];
    for &(path, data) in files {
        let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
        let index = match dirs.iter().position(|(d, _)| d == dir) {
            Some(i) => i,
            None => {
                dirs.push((dir.to_string(), Vec::new()));
                dirs.len() - 1
            }
        };
        dirs[index].1.push((name.to_ascii_uppercase(), data));
    }

    // Sectors: 0-15 system area, 16 PVD, 17 terminator, one per directory,
    // then file data.
    let dir_sector = |i: usize| (18 + i) as u32;
    let mut next_data = 18 + dirs.len();
    let mut data_sectors = Vec::new();
    let mut file_extents = Vec::new();
    for (_, entries) in &dirs {
        let mut extents = Vec::new();
        for (_, data) in entries {
            extents.push(next_data as u32);
            data_sectors.push(*data);
            next_data += data.len().div_ceil(SECTOR).max(1);
        }
        file_extents.push(extents);
    }

    let mut image = vec![0u8; next_data * SECTOR];
    let root = iso_record(&[0], dir_sector(0), SECTOR as u32, true);

    let pvd = &mut image[16 * SECTOR..17 * SECTOR];
    pvd[0] = 1;
    pvd[1..6].copy_from_slice(b"CD001");
    pvd[6] = 1;
    pvd[156..156 + root.len()].copy_from_slice(&root);
    let term = &mut image[17 * SECTOR..18 * SECTOR];
    term[0] = 255;
    term[1..6].copy_from_slice(b"CD001");
    term[6] = 1;

    for (i, (_, entries)) in dirs.iter().enumerate() {
        let mut records = iso_record(&[0], dir_sector(i), SECTOR as u32, true);
        records.extend(iso_record(&[1], dir_sector(0), SECTOR as u32, true));
        if i == 0 {
            for (j, (sub, _)) in dirs.iter().enumerate().skip(1) {
                records.extend(iso_record(
                    sub.to_ascii_uppercase().as_bytes(),
                    dir_sector(j),
                    SECTOR as u32,
                    true,
                ));
            }
        }
        for ((file, data), extent) in entries.iter().zip(&file_extents[i]) {
            let stored = format!("{};1", file);
            records.extend(iso_record(stored.as_bytes(), *extent, data.len() as u32, false));
        }
        assert!(records.len() <= SECTOR, "directory too large for test image");
        let at = dir_sector(i) as usize * SECTOR;
        image[at..at + records.len()].copy_from_slice(&records);
    }

    let mut extents = file_extents.iter().flatten();
    for data in data_sectors {
        let at = *extents.next().unwrap() as usize * SECTOR;
        image[at..at + data.len()].copy_from_slice(data);
    }
    image
}

// =============================================================================
// ZIP
// =============================================================================

/// Zip compression choice for [`zip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipMethod {
    Stored,
    #[cfg(feature = "deflate")]
    Deflate,
    #[cfg(feature = "lzma")]
    Lzma,
}

/// A zip archive with regular files, written by a Unix host.
pub fn zip(files: &Files<'_>, method: ZipMethod) -> Vec<u8> {
    let entries: Vec<_> = files.iter().map(|(n, d)| (*n, *d, 0o100644u32)).collect();
    zip_with_modes(&entries, method)
}

/// A zip archive with explicit Unix modes (`0o120777` makes a symlink whose
/// target is the data).
pub fn zip_with_modes(entries: &[(&str, &[u8], u32)], method: ZipMethod) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, data, mode) in entries {
        let (method_id, packed): (u16, Vec<u8>) = match method {
            ZipMethod::Stored => (0, data.to_vec()),
            #[cfg(feature = "deflate")]
            ZipMethod::Deflate => {
                let mut enc = flate2::write::DeflateEncoder::new(
                    Vec::new(),
                    flate2::Compression::default(),
                );
                enc.write_all(data).unwrap();
                (8, enc.finish().unwrap())
            }
            #[cfg(feature = "lzma")]
            ZipMethod::Lzma => {
                let opts = lzma_rust2::LzmaOptions::with_preset(6);
                let mut writer =
                    lzma_rust2::LzmaWriter::new_no_header(Vec::new(), &opts, true).unwrap();
                writer.write_all(data).unwrap();
                // LZMA SDK version, properties size, properties
                let mut packed = vec![9, 20, 5, 0, opts.get_props()];
                packed.extend_from_slice(&opts.dict_size.to_le_bytes());
                packed.extend_from_slice(&writer.finish().unwrap());
                (14, packed)
            }
        };
        let offset = out.len() as u32;
        let crc = crc32fast::hash(data);
        // 1980-01-01 00:00:00
        let (time, date) = (0u16, 0x21u16);

        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&method_id.to_le_bytes());
        out.extend_from_slice(&time.to_le_bytes());
        out.extend_from_slice(&date.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(packed.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&packed);

        central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        central.extend_from_slice(&[20, 3]);
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&method_id.to_le_bytes());
        central.extend_from_slice(&time.to_le_bytes());
        central.extend_from_slice(&date.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(packed.len() as u32).to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&[0; 8]);
        central.extend_from_slice(&(mode << 16).to_le_bytes());
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }
    let cd_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

// =============================================================================
// 7z
// =============================================================================

mod property_id {
    pub const END: u8 = 0x00;
    pub const HEADER: u8 = 0x01;
    pub const MAIN_STREAMS_INFO: u8 = 0x04;
    pub const FILES_INFO: u8 = 0x05;
    pub const PACK_INFO: u8 = 0x06;
    pub const UNPACK_INFO: u8 = 0x07;
    pub const SUBSTREAMS_INFO: u8 = 0x08;
    pub const SIZE: u8 = 0x09;
    pub const CRC: u8 = 0x0A;
    pub const FOLDER: u8 = 0x0B;
    pub const CODERS_UNPACK_SIZE: u8 = 0x0C;
    pub const NUM_UNPACK_STREAM: u8 = 0x0D;
    pub const NAME: u8 = 0x11;
}

/// Compression used for the single solid folder of [`sevenz`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SevenZMethod {
    Copy,
    #[cfg(feature = "lzma")]
    Lzma,
}

fn write_number(out: &mut Vec<u8>, value: u64) {
    let mut extra = 0;
    while extra < 8 && value >= 1u64 << (7 * (extra + 1)) {
        extra += 1;
    }
    let high = if extra == 8 { 0 } else { (value >> (8 * extra)) as u8 };
    out.push(!(0xFFu8 >> extra) | high);
    out.extend_from_slice(&value.to_le_bytes()[..extra]);
}

/// A solid 7z archive holding every file in one folder.
///
/// `files` must not be empty and every file must have content.
pub fn sevenz(files: &Files<'_>, method: SevenZMethod) -> Vec<u8> {
    use property_id::*;

    let unpacked: Vec<u8> = files.iter().flat_map(|(_, d)| d.iter().copied()).collect();
    let (coder, packed): (Vec<u8>, Vec<u8>) = match method {
        SevenZMethod::Copy => (vec![0x01, 0x00], unpacked.clone()),
        #[cfg(feature = "lzma")]
        SevenZMethod::Lzma => {
            let opts = lzma_rust2::LzmaOptions::with_preset(6);
            let mut writer = lzma_rust2::LzmaWriter::new_no_header(Vec::new(), &opts, true).unwrap();
            writer.write_all(&unpacked).unwrap();
            let packed = writer.finish().unwrap();
            let mut coder = vec![0x23, 0x03, 0x01, 0x01, 5, opts.get_props()];
            coder.extend_from_slice(&opts.dict_size.to_le_bytes());
            (coder, packed)
        }
    };

    let mut h = vec![HEADER, MAIN_STREAMS_INFO, PACK_INFO];
    write_number(&mut h, 0);
    write_number(&mut h, 1);
    h.push(SIZE);
    write_number(&mut h, packed.len() as u64);
    h.push(END);

    h.extend_from_slice(&[UNPACK_INFO, FOLDER, 1, 0, 1]);
    h.extend_from_slice(&coder);
    h.push(CODERS_UNPACK_SIZE);
    write_number(&mut h, unpacked.len() as u64);
    h.push(END);

    h.push(SUBSTREAMS_INFO);
    h.push(NUM_UNPACK_STREAM);
    write_number(&mut h, files.len() as u64);
    h.push(SIZE);
    for (_, data) in &files[..files.len() - 1] {
        write_number(&mut h, data.len() as u64);
    }
    h.extend_from_slice(&[CRC, 1]);
    for (_, data) in files {
        h.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    }
    h.push(END);
    h.push(END);

    h.push(FILES_INFO);
    write_number(&mut h, files.len() as u64);
    let mut names = vec![0u8];
    for (name, _) in files {
        for unit in name.encode_utf16().chain([0]) {
            names.extend_from_slice(&unit.to_le_bytes());
        }
    }
    h.push(NAME);
    write_number(&mut h, names.len() as u64);
    h.extend_from_slice(&names);
    h.push(END);
    h.push(END);

    let mut tail = Vec::new();
    tail.extend_from_slice(&(packed.len() as u64).to_le_bytes());
    tail.extend_from_slice(&(h.len() as u64).to_le_bytes());
    tail.extend_from_slice(&crc32fast::hash(&h).to_le_bytes());

    let mut out = vec![b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C, 0, 4];
    out.extend_from_slice(&crc32fast::hash(&tail).to_le_bytes());
    out.extend_from_slice(&tail);
    out.extend_from_slice(&packed);
    out.extend_from_slice(&h);
    out
}

// =============================================================================
// Everything
// =============================================================================

/// One archive of every packed format, each holding `files`, with the
/// extension its format expects.
///
/// Names must suit the most restrictive format: at most 8 bytes, no
/// directories.
pub fn every_format(files: &Files<'_>) -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("zip", zip(files, ZipMethod::Stored)),
        ("7z", sevenz(files, SevenZMethod::Copy)),
        ("grp", grp(files)),
        ("wad", wad(files)),
        ("pak", qpak(files)),
        ("hog", hog(files)),
        ("mvl", mvl(files)),
        ("slb", slb(files)),
        ("vdf", vdf(files)),
        ("iso", iso(files)),
    ]
}
