use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Directory under the storage root where abstract playlists are
/// mirrored as on-disk playlist files.
pub const INTERNAL_PLAYLIST_DIR: &str = "Playlists";

/// Parses a line-based playlist file (.m3u, .pla). Blank lines and
/// `#`-comments are skipped; relative entries resolve against the
/// playlist's own directory.
pub fn parse_playlist(path: &Path) -> Vec<PathBuf> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return vec![],
    };
    let base = path.parent().unwrap_or_else(|| Path::new("/"));
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let entry = Path::new(line);
            if entry.is_absolute() {
                entry.to_path_buf()
            } else {
                base.join(entry)
            }
        })
        .collect()
}

/// Rewrites a playlist file from a reference list. Entries inside the
/// playlist's directory are written relative, the rest absolute.
pub fn write_playlist(path: &Path, entries: &[PathBuf]) -> io::Result<()> {
    let base = path.parent().unwrap_or_else(|| Path::new("/"));
    let mut file = fs::File::create(path)?;
    for entry in entries {
        let line = match entry.strip_prefix(base) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => entry.clone(),
        };
        writeln!(file, "{}", line.display())?;
    }
    Ok(())
}

/// Whether a file name carries one of the playlist extensions the
/// storage mirrors.
pub fn is_playlist_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()),
        Some(ref ext) if ext == "m3u" || ext == "pla"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comments_and_relative_entries() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("mix.m3u");
        fs::write(
            &playlist,
            "#EXTM3U\nsong1.mp3\n\n/music/song2.mp3\n# trailing comment\n",
        )
        .unwrap();
        let entries = parse_playlist(&playlist);
        assert_eq!(
            entries,
            vec![dir.path().join("song1.mp3"), PathBuf::from("/music/song2.mp3")]
        );
    }

    #[test]
    fn write_then_parse_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("mix.m3u");
        let entries = vec![dir.path().join("a.mp3"), PathBuf::from("/elsewhere/b.mp3")];
        write_playlist(&playlist, &entries).unwrap();
        assert_eq!(parse_playlist(&playlist), entries);
    }

    #[test]
    fn playlist_extension_detection() {
        assert!(is_playlist_file(Path::new("x.M3U")));
        assert!(is_playlist_file(Path::new("x.pla")));
        assert!(!is_playlist_file(Path::new("x.mp3")));
    }
}
