//! Container detection via header byte sniffing, and opening the matching
//! Sample Source for a path.

use std::{fs::File, io::Read, path::Path};

use tracing::debug;

use crate::{
    common::{Error, Result},
    media::{SampleSource, mp4::Mp4Source, symphonia::SymphoniaSource},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Mp4,
    Webm,
    Ogg,
    Flac,
    Wav,
    Mp3,
    Unknown,
}

impl ContainerFormat {
    pub fn as_ext(self) -> Option<&'static str> {
        match self {
            Self::Mp4 => Some("mp4"),
            Self::Webm => Some("webm"),
            Self::Ogg => Some("ogg"),
            Self::Flac => Some("flac"),
            Self::Wav => Some("wav"),
            Self::Mp3 => Some("mp3"),
            Self::Unknown => None,
        }
    }
}

/// `(offset, magic)` signatures; a header must match every entry of a row.
const SIGNATURES: &[(ContainerFormat, &[(usize, &[u8])])] = &[
    (ContainerFormat::Mp4, &[(4, b"ftyp")]),
    (ContainerFormat::Webm, &[(0, &[0x1A, 0x45, 0xDF, 0xA3])]),
    (ContainerFormat::Ogg, &[(0, b"OggS")]),
    (ContainerFormat::Flac, &[(0, b"fLaC")]),
    (ContainerFormat::Wav, &[(0, b"RIFF"), (8, b"WAVE")]),
    (ContainerFormat::Mp3, &[(0, b"ID3")]),
];

/// Sniff the container from the first bytes of a file. Anything shorter
/// than 4 bytes, or not in the signature table, is `Unknown`.
pub fn detect_format(header: &[u8]) -> ContainerFormat {
    if header.len() < 4 {
        return ContainerFormat::Unknown;
    }

    let matches = |offset: usize, magic: &[u8]| {
        header
            .get(offset..offset + magic.len())
            .is_some_and(|bytes| bytes == magic)
    };
    if let Some((format, _)) = SIGNATURES
        .iter()
        .find(|(_, parts)| parts.iter().all(|(offset, magic)| matches(*offset, magic)))
    {
        return *format;
    }

    // Bare MPEG audio frame sync.
    if header[0] == 0xFF && header[1] & 0xE0 == 0xE0 {
        return ContainerFormat::Mp3;
    }
    ContainerFormat::Unknown
}

/// Open `path` as a Sample Source: ISO-BMFF through the MP4 demuxer,
/// everything else through symphonia's probe.
pub fn open_source(path: impl AsRef<Path>) -> Result<Box<dyn SampleSource>> {
    let path = path.as_ref();
    let mut header = [0u8; 12];
    let read = File::open(path)
        .and_then(|mut file| file.read(&mut header))
        .map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let format = detect_format(&header[..read]);
    debug!("{}: detected {:?}", path.display(), format);

    Ok(match format {
        ContainerFormat::Mp4 => Box::new(Mp4Source::open(path)?),
        _ => Box::new(SymphoniaSource::open(path)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_mp4() {
        assert_eq!(
            detect_format(b"\x00\x00\x00\x1Cftypisom"),
            ContainerFormat::Mp4
        );
    }

    #[test]
    fn detect_webm() {
        let hdr = [0x1A, 0x45, 0xDF, 0xA3, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(detect_format(&hdr), ContainerFormat::Webm);
    }

    #[test]
    fn detect_wav_and_mp3() {
        assert_eq!(detect_format(b"RIFF\x24\x00\x00\x00WAVE"), ContainerFormat::Wav);
        assert_eq!(detect_format(b"ID3\x04\x00"), ContainerFormat::Mp3);
        assert_eq!(detect_format(&[0xFF, 0xFB, 0x90, 0x00]), ContainerFormat::Mp3);
    }

    #[test]
    fn detect_unknown() {
        assert_eq!(detect_format(&[0, 0, 0, 0]), ContainerFormat::Unknown);
        assert_eq!(detect_format(b"ab"), ContainerFormat::Unknown);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = open_source("/definitely/not/here.mp4").err().unwrap();
        assert!(matches!(err, Error::Open { .. }));
    }
}
