use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use std::path::Path;

/// Object format codes: the PIMA 15740 ancillary/image sets plus the
/// MTP 1.1 media and abstract-collection codes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive, ToPrimitive, Ord, PartialOrd, Eq, Hash)]
pub enum StandardFormatCode {
    UndefinedNonImage = 0x3000,
    Association = 0x3001,
    Script = 0x3002,
    Executable = 0x3003,
    Text = 0x3004,
    Html = 0x3005,
    Dpof = 0x3006,
    Aiff = 0x3007,
    Wav = 0x3008,
    Mp3 = 0x3009,
    Avi = 0x300A,
    Mpeg = 0x300B,
    Asf = 0x300C,
    UndefinedImage = 0x3800,
    ExifJpeg = 0x3801,
    TiffEp = 0x3802,
    FlashPix = 0x3803,
    Bmp = 0x3804,
    Ciff = 0x3805,
    Gif = 0x3807,
    Jfif = 0x3808,
    Pcd = 0x3809,
    Pict = 0x380A,
    Png = 0x380B,
    Tiff = 0x380D,
    TiffIt = 0x380E,
    Jp2 = 0x380F,
    Jpx = 0x3810,
    UndefinedFirmware = 0xB802,
    WindowsImageFormat = 0xB881,
    UndefinedAudio = 0xB900,
    WindowsMediaAudio = 0xB901,
    Ogg = 0xB902,
    Aac = 0xB903,
    Audible = 0xB904,
    Flac = 0xB906,
    UndefinedVideo = 0xB980,
    WindowsMediaVideo = 0xB981,
    Mp4Container = 0xB982,
    Mp2 = 0xB983,
    ThreeGpContainer = 0xB984,
    UndefinedCollection = 0xBA00,
    AbstractMultimediaAlbum = 0xBA01,
    AbstractImageAlbum = 0xBA02,
    AbstractAudioAlbum = 0xBA03,
    AbstractVideoAlbum = 0xBA04,
    AbstractAudioVideoPlaylist = 0xBA05,
    AbstractAudioPlaylist = 0xBA09,
    AbstractVideoPlaylist = 0xBA0A,
    WplPlaylist = 0xBA10,
    M3uPlaylist = 0xBA11,
    MhtCompiledHtml = 0xBA84,
    Xml = 0xBA82,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatCode {
    Standard(StandardFormatCode),
    Reserved(u16),
    Vendor(u16),
    AllImages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCategory {
    Ancillary,
    Audio,
    Video,
    Image,
    Collection,
    Unknown,
}

impl FormatCode {
    pub fn category(&self) -> FormatCategory {
        use StandardFormatCode::*;
        match self {
            FormatCode::Standard(code) => match *code {
                UndefinedNonImage | Association | Script | Executable | Text | Html | Dpof
                | UndefinedFirmware | Xml | MhtCompiledHtml => FormatCategory::Ancillary,
                Aiff | Wav | Mp3 | UndefinedAudio | WindowsMediaAudio | Ogg | Aac | Audible
                | Flac => FormatCategory::Audio,
                Avi | Mpeg | Asf | UndefinedVideo | WindowsMediaVideo | Mp4Container | Mp2
                | ThreeGpContainer => FormatCategory::Video,
                UndefinedImage | ExifJpeg | TiffEp | FlashPix | Bmp | Ciff | Gif | Jfif | Pcd
                | Pict | Png | Tiff | TiffIt | Jp2 | Jpx | WindowsImageFormat => {
                    FormatCategory::Image
                }
                UndefinedCollection | AbstractMultimediaAlbum | AbstractImageAlbum
                | AbstractAudioAlbum | AbstractVideoAlbum | AbstractAudioVideoPlaylist
                | AbstractAudioPlaylist | AbstractVideoPlaylist | WplPlaylist | M3uPlaylist => {
                    FormatCategory::Collection
                }
            },
            FormatCode::AllImages => FormatCategory::Image,
            _ => FormatCategory::Unknown,
        }
    }

    pub fn is_association(&self) -> bool {
        *self == FormatCode::Standard(StandardFormatCode::Association)
    }

    pub fn is_playlist(&self) -> bool {
        matches!(
            self,
            FormatCode::Standard(StandardFormatCode::AbstractAudioVideoPlaylist)
                | FormatCode::Standard(StandardFormatCode::AbstractAudioPlaylist)
                | FormatCode::Standard(StandardFormatCode::AbstractVideoPlaylist)
                | FormatCode::Standard(StandardFormatCode::M3uPlaylist)
        )
    }
}

impl FromPrimitive for FormatCode {
    fn from_i64(_: i64) -> Option<Self> {
        None
    }

    fn from_u64(n: u64) -> Option<Self> {
        let n = n as u16;

        const MSN_MASK: u16 = 0b1111_0000_0000_0000;
        const RESERVED_MSN: u16 = 0b0011;
        const VENDOR_MSN: u16 = 0b1011;

        if let Some(code) = StandardFormatCode::from_u16(n) {
            return Some(FormatCode::Standard(code));
        }

        if n == 0xFFFF {
            return Some(FormatCode::AllImages);
        }

        let msn = (n & MSN_MASK) >> 12;

        if msn == VENDOR_MSN {
            return Some(FormatCode::Vendor(n));
        }

        if msn == RESERVED_MSN {
            return Some(FormatCode::Reserved(n));
        }

        None
    }
}

impl ToPrimitive for FormatCode {
    fn to_i64(&self) -> Option<i64> {
        None
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            FormatCode::Standard(code) => code.to_u64(),
            FormatCode::Reserved(n) | FormatCode::Vendor(n) => Some(*n as u64),
            FormatCode::AllImages => Some(0xFFFF),
        }
    }
}

impl FormatCode {
    pub fn to_u16(&self) -> u16 {
        self.to_u64().unwrap_or(0x3000) as u16
    }

    pub fn from_u16_lossy(n: u16) -> FormatCode {
        FormatCode::from_u16(n).unwrap_or(FormatCode::Standard(StandardFormatCode::UndefinedNonImage))
    }
}

/// Extension to format-code table used when the initiator does not
/// supply an object format.
static FORMAT_BY_EXTENSION: &[(&str, StandardFormatCode)] = &[
    ("txt", StandardFormatCode::Text),
    ("htm", StandardFormatCode::Html),
    ("html", StandardFormatCode::Html),
    ("xml", StandardFormatCode::Xml),
    ("wav", StandardFormatCode::Wav),
    ("aif", StandardFormatCode::Aiff),
    ("aiff", StandardFormatCode::Aiff),
    ("mp3", StandardFormatCode::Mp3),
    ("wma", StandardFormatCode::WindowsMediaAudio),
    ("ogg", StandardFormatCode::Ogg),
    ("aac", StandardFormatCode::Aac),
    ("m4a", StandardFormatCode::Mp4Container),
    ("flac", StandardFormatCode::Flac),
    ("avi", StandardFormatCode::Avi),
    ("mpg", StandardFormatCode::Mpeg),
    ("mpeg", StandardFormatCode::Mpeg),
    ("mp4", StandardFormatCode::Mp4Container),
    ("3gp", StandardFormatCode::ThreeGpContainer),
    ("asf", StandardFormatCode::Asf),
    ("wmv", StandardFormatCode::WindowsMediaVideo),
    ("jpg", StandardFormatCode::ExifJpeg),
    ("jpeg", StandardFormatCode::ExifJpeg),
    ("jpe", StandardFormatCode::ExifJpeg),
    ("bmp", StandardFormatCode::Bmp),
    ("gif", StandardFormatCode::Gif),
    ("png", StandardFormatCode::Png),
    ("tif", StandardFormatCode::Tiff),
    ("tiff", StandardFormatCode::Tiff),
    ("wpl", StandardFormatCode::WplPlaylist),
    ("m3u", StandardFormatCode::M3uPlaylist),
    ("pla", StandardFormatCode::AbstractAudioVideoPlaylist),
];

/// Infers a format code from a file name. Directories are associations;
/// unknown extensions map to `UndefinedNonImage`.
pub fn format_by_extension(path: &Path, is_dir: bool) -> FormatCode {
    if is_dir {
        return FormatCode::Standard(StandardFormatCode::Association);
    }
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return FormatCode::Standard(StandardFormatCode::UndefinedNonImage),
    };
    FORMAT_BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, code)| FormatCode::Standard(*code))
        .unwrap_or(FormatCode::Standard(StandardFormatCode::UndefinedNonImage))
}

/// Association (folder) type codes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive, ToPrimitive, Ord, PartialOrd, Eq)]
pub enum StandardAssociationCode {
    Undefined = 0x0000,
    GenericFolder = 0x0001,
    Album = 0x0002,
    TimeSequence = 0x0003,
    PanoramicHorizontal = 0x0004,
    PanoramicVertical = 0x0005,
    Panoramic2D = 0x0006,
    AncillaryData = 0x0007,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationCode {
    Standard(StandardAssociationCode),
    Reserved(u16),
    Vendor(u16),
}

impl FromPrimitive for AssociationCode {
    fn from_i64(_: i64) -> Option<Self> {
        None
    }

    fn from_u64(n: u64) -> Option<Self> {
        let n = n as u16;

        if let Some(code) = StandardAssociationCode::from_u16(n) {
            return Some(AssociationCode::Standard(code));
        }

        if (n >> 15) & 1 == 1 {
            return Some(AssociationCode::Vendor(n));
        }

        Some(AssociationCode::Reserved(n))
    }
}

impl ToPrimitive for AssociationCode {
    fn to_i64(&self) -> Option<i64> {
        None
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            AssociationCode::Standard(code) => code.to_u64(),
            AssociationCode::Reserved(n) | AssociationCode::Vendor(n) => Some(*n as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_are_associations() {
        let code = format_by_extension(Path::new("/x/Music"), true);
        assert!(code.is_association());
    }

    #[test]
    fn extension_inference_is_case_insensitive() {
        let code = format_by_extension(Path::new("/x/IMG_0001.JPG"), false);
        assert_eq!(code, FormatCode::Standard(StandardFormatCode::ExifJpeg));
    }

    #[test]
    fn unknown_extension_is_undefined() {
        let code = format_by_extension(Path::new("/x/data.zorp"), false);
        assert_eq!(
            code,
            FormatCode::Standard(StandardFormatCode::UndefinedNonImage)
        );
    }

    #[test]
    fn playlist_formats_detected() {
        assert!(format_by_extension(Path::new("a.m3u"), false).is_playlist());
        assert!(format_by_extension(Path::new("a.pla"), false).is_playlist());
    }

    #[test]
    fn format_code_spaces() {
        assert_eq!(FormatCode::from_u16(0xB701), Some(FormatCode::Vendor(0xB701)));
        assert_eq!(FormatCode::from_u16(0xFFFF), Some(FormatCode::AllImages));
        assert_eq!(
            FormatCode::from_u16(0xBA11),
            Some(FormatCode::Standard(StandardFormatCode::M3uPlaylist))
        );
    }
}
