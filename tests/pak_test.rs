#![allow(missing_docs)]

mod common;

use std::io::Read;

use common::CHALLENGE;
use gamebox::crypto::{BLOCK_SIZE, BlowfishCbc, BlowfishCbcReader, padded_len};
use gamebox::{GbxError, PakArchive, PakWriter, Result};

const KEY: &[u8] = b"stadium-key-16b!";

fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Maps\Stadium\Map.Gbx, Blocks\readme.txt and a top-level notes.txt.
fn sample_archive(version: i32) -> Result<Vec<u8>> {
    let mut pak = PakWriter::new(KEY).version(version).iv_seed(0x1234_5678_9ABC_DEF0);
    let maps = pak.add_folder(None, "Maps");
    let blocks = pak.add_folder(None, "Blocks");
    let stadium = pak.add_folder(Some(maps), "Stadium");
    pak.add_file(Some(stadium), "Map.Gbx", common::challenge_bytes()?, true);
    pak.add_file(Some(blocks), "readme.txt", vec![b'a'; 1000], true);
    pak.add_file(None, "notes.txt", b"raw notes".to_vec(), false);
    pak.to_bytes()
}

// --- TESTS ---

/// The catalog reads back with the folder tree and file table.
#[test]
fn test_archive_layout() -> Result<()> {
    let bytes = sample_archive(3)?;
    assert_eq!(&bytes[..8], b"NadeoPak");
    let pak = PakArchive::from_bytes(bytes.clone(), KEY)?;

    assert_eq!(pak.version, 3);
    assert!(pak.gbx_headers_size.is_some());
    let metadata_start = usize::try_from(pak.metadata_start).unwrap_or_default();
    let data_start = usize::try_from(pak.data_start).unwrap_or_default();
    assert_eq!(metadata_start % BLOCK_SIZE, 20 % BLOCK_SIZE);
    assert!(metadata_start < data_start && data_start < bytes.len());
    assert_eq!((data_start - metadata_start) % BLOCK_SIZE, 0);

    let folders: Vec<(Option<usize>, &str)> =
        pak.folders.iter().map(|f| (f.parent, f.name.as_str())).collect();
    assert_eq!(
        folders,
        vec![(None, "Maps\\"), (None, "Blocks\\"), (Some(0), "Stadium\\")]
    );
    assert_eq!(pak.folder_path(2), "Maps\\Stadium\\");
    assert_eq!(pak.files.len(), 3);
    Ok(())
}

/// Paths accept both separators, skip empty elements and walk `..` upward.
#[test]
fn test_find() -> Result<()> {
    let pak = PakArchive::from_bytes(sample_archive(3)?, KEY)?;

    for path in [
        "Maps/Stadium/Map.Gbx",
        "Maps\\Stadium\\Map.Gbx",
        "\\Maps\\Stadium\\Map.Gbx",
        "Blocks/../Maps//Stadium/Map.Gbx",
    ] {
        let file = pak.find(path).map(|f| (f.folder, f.name.as_str()));
        assert_eq!(file, Some((Some(2), "Map.Gbx")), "{path}");
    }
    assert_eq!(pak.find("notes.txt").map(|f| f.folder), Some(None));
    assert!(pak.find("Maps/Map.Gbx").is_none());
    assert!(pak.find("Missing/Map.Gbx").is_none());
    assert!(pak.find("Blocks/notes.txt").is_none());
    Ok(())
}

/// File contents decrypt and inflate back to what was added.
#[test]
fn test_read_files() -> Result<()> {
    let pak = PakArchive::from_bytes(sample_archive(3)?, KEY)?;

    let Some(readme) = pak.find("Blocks/readme.txt") else {
        panic!("readme.txt missing");
    };
    assert!(readme.is_compressed());
    assert!(readme.compressed_size < readme.uncompressed_size);
    assert!(readme.header.is_none());
    assert_eq!(pak.read_file(readme)?, vec![b'a'; 1000]);

    let Some(notes) = pak.find("notes.txt") else {
        panic!("notes.txt missing");
    };
    assert!(!notes.is_compressed());
    assert_eq!(pak.read_file(notes)?, b"raw notes");

    let Some(map) = pak.find("Maps/Stadium/Map.Gbx") else {
        panic!("Map.Gbx missing");
    };
    assert_eq!(pak.read_file(map)?, common::challenge_bytes()?);
    Ok(())
}

/// GBX entries carry their header in the catalog and parse from the archive.
#[test]
fn test_gbx_entries() -> Result<()> {
    let registry = common::registry();
    let pak = PakArchive::from_bytes(sample_archive(3)?, KEY)?;

    let Some(map) = pak.find("Maps/Stadium/Map.Gbx") else {
        panic!("Map.Gbx missing");
    };
    assert_eq!(map.class_id, CHALLENGE);
    assert_eq!(map.header.as_ref().map(|h| (h.class_id, h.num_nodes)), Some((CHALLENGE, 4)));

    let gbx = pak.open_gbx(map, registry.clone())?;
    assert!(gbx.is_body_decoded());
    assert_eq!(gbx.aux_nodes().len(), 2);

    let node = pak.node_from_path("Maps/Stadium/Map.Gbx", registry.clone())?;
    let class_id = node.map(|n| n.class_id()).transpose()?;
    assert_eq!(class_id, Some(CHALLENGE));
    assert!(pak.node_from_path("Maps/Other.Gbx", registry)?.is_none());
    Ok(())
}

/// Version 1 archives have no catalog sizes in the header.
#[test]
fn test_version_one() -> Result<()> {
    let pak = PakArchive::from_bytes(sample_archive(1)?, KEY)?;
    assert_eq!(pak.version, 1);
    assert!(pak.gbx_headers_size.is_none());
    assert!(pak.gbx_headers_compressed_size.is_none());

    let Some(notes) = pak.find("notes.txt") else {
        panic!("notes.txt missing");
    };
    assert_eq!(pak.read_file(notes)?, b"raw notes");
    assert!(pak.find("Maps/Stadium/Map.Gbx").is_some_and(|f| f.header.is_some()));
    Ok(())
}

/// Opening a file from disk goes through the memory map.
#[test]
fn test_open_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Stadium.pak");
    std::fs::write(&path, sample_archive(3)?)?;

    let pak = PakArchive::open(&path, KEY)?;
    assert_eq!(pak.files.len(), 3);
    Ok(())
}

/// Wrong keys and foreign files are rejected.
#[test]
fn test_rejected_archives() -> Result<()> {
    let bytes = sample_archive(3)?;
    assert!(PakArchive::from_bytes(bytes.clone(), b"another-key-0000").is_err());
    assert!(matches!(
        PakArchive::from_bytes(bytes, b"abc"),
        Err(GbxError::Crypto(_))
    ));
    assert!(matches!(
        PakArchive::from_bytes(b"NotAPak!\x03\0\0\0".to_vec(), KEY),
        Err(GbxError::Format(_))
    ));
    Ok(())
}

/// The chaining value flips every 256 bytes; both directions agree on it.
#[test]
fn test_cbc_round_trip() -> Result<()> {
    let plain = sample_data(600);
    let mut data = plain.clone();
    let mut cbc = BlowfishCbc::new(KEY, 0xCAFE)?;
    cbc.encrypt(&mut data)?;
    assert_eq!(cbc.position(), 600);
    assert_ne!(data, plain);

    let mut out = data.clone();
    BlowfishCbc::new(KEY, 0xCAFE)?.decrypt(&mut out)?;
    assert_eq!(out, plain);

    let mut wrong_iv = data;
    BlowfishCbc::new(KEY, 0xBEEF)?.decrypt(&mut wrong_iv)?;
    assert_ne!(&wrong_iv[..8], &plain[..8]);
    assert_eq!(&wrong_iv[8..], &plain[8..]);

    let mut odd = vec![0u8; 7];
    assert!(matches!(cbc.encrypt(&mut odd), Err(GbxError::Crypto(_))));
    assert_eq!(padded_len(7), 8);
    assert_eq!(padded_len(16), 16);
    Ok(())
}

/// The stream reader returns the plaintext whatever the read sizes.
#[test]
fn test_cbc_reader() -> Result<()> {
    let plain = sample_data(520);
    let mut data = plain.clone();
    BlowfishCbc::new(KEY, 7)?.encrypt(&mut data)?;

    let mut reader = BlowfishCbcReader::new(data.as_slice(), KEY, 7)?;
    let mut out = Vec::new();
    let mut buf = [0u8; 13];
    loop {
        let n = reader.read(&mut buf[..5 + out.len() % 9])?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, plain);
    Ok(())
}

/// A key change mid-stream applies to the following blocks only.
#[test]
fn test_cbc_rekey() -> Result<()> {
    let plain = sample_data(128);
    let mut data = plain.clone();
    let mut cbc = BlowfishCbc::new(KEY, 99)?;
    let (head, tail) = data.split_at_mut(64);
    cbc.encrypt(head)?;
    cbc.rekey(b"Stad")?;
    cbc.encrypt(tail)?;

    let mut reader = BlowfishCbcReader::new(data.as_slice(), KEY, 99)?;
    let mut out = vec![0u8; 128];
    reader.read_exact(&mut out[..64])?;
    reader.rekey(b"Stad")?;
    reader.read_exact(&mut out[64..])?;
    assert_eq!(out, plain);

    let mut no_rekey = data;
    BlowfishCbc::new(KEY, 99)?.decrypt(&mut no_rekey)?;
    assert_eq!(&no_rekey[..64], &plain[..64]);
    assert_ne!(&no_rekey[64..], &plain[64..]);
    Ok(())
}
