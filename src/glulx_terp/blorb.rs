//! Blorb container handling. A game may arrive bare (`Glul` magic) or inside
//! an IFF `FORM/IFRS` wrapper; the core consumes exactly one chunk of the
//! wrapper, the `GLUL` game image. Resource chunks are a host concern.

use byteorder::{BigEndian, ByteOrder};
use log::debug;

#[derive(Debug)]
pub enum BlorbError {
    NotGlulx,
    NoGameChunk,
    Truncated,
}

/// Extract the raw Glulx image from `file`, unwrapping a Blorb container if
/// there is one.
pub fn unwrap_game_image(file: Vec<u8>) -> Result<Vec<u8>, BlorbError> {
    if file.len() >= 4 && &file[0..4] == b"Glul" {
        return Ok(file);
    }
    if file.len() < 12 || &file[0..4] != b"FORM" || &file[8..12] != b"IFRS" {
        return Err(BlorbError::NotGlulx);
    }

    let mut pos = 12usize;
    while pos + 8 <= file.len() {
        let id = &file[pos..pos + 4];
        let len = BigEndian::read_u32(&file[pos + 4..pos + 8]) as usize;
        let body = pos + 8;
        if body + len > file.len() {
            return Err(BlorbError::Truncated);
        }
        if id == b"GLUL" {
            debug!("found GLUL chunk at {body}, {len} bytes");
            return Ok(file[body..body + len].to_vec());
        }
        // Chunks are 16-bit aligned.
        pos = body + len + (len & 1);
    }

    Err(BlorbError::NoGameChunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, WriteBytesExt};

    fn blorb_around(game: &[u8]) -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(b"FORM");
        // Filled in below.
        file.write_u32::<BigEndian>(0).unwrap();
        file.extend_from_slice(b"IFRS");
        // A resource-index chunk the core should skip, with an odd length to
        // exercise the alignment padding.
        file.extend_from_slice(b"RIdx");
        file.write_u32::<BigEndian>(3).unwrap();
        file.extend_from_slice(&[1, 2, 3, 0]);
        file.extend_from_slice(b"GLUL");
        file.write_u32::<BigEndian>(game.len() as u32).unwrap();
        file.extend_from_slice(game);
        let total = (file.len() - 8) as u32;
        file[4..8].copy_from_slice(&total.to_be_bytes());
        file
    }

    #[test]
    fn bare_image_passes_through() {
        let game = b"Glul\x00\x03\x01\x03rest".to_vec();
        assert_eq!(unwrap_game_image(game.clone()).unwrap(), game);
    }

    #[test]
    fn blorb_yields_glul_chunk() {
        let game = b"Glul\x00\x03\x01\x03body";
        let out = unwrap_game_image(blorb_around(game)).unwrap();
        assert_eq!(out, game);
    }

    #[test]
    fn rejects_foreign_files() {
        assert!(matches!(unwrap_game_image(b"ZCOD".to_vec()), Err(BlorbError::NotGlulx)));
        let mut no_game = blorb_around(b"Glul");
        // Corrupt the GLUL id so no game chunk is found.
        let pos = no_game.windows(4).position(|w| w == b"GLUL").unwrap();
        no_game[pos..pos + 4].copy_from_slice(b"JUNK");
        assert!(matches!(unwrap_game_image(no_game), Err(BlorbError::NoGameChunk)));
    }
}
