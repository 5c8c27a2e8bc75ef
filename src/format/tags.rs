/*!
The `tags` module reads and writes the optional metadata trailer shared by
the IMF, DRO and RAW formats: a 0x1A signature followed by three
null-terminated strings (title, composer, comments) and a program name.
!*/

use crate::core::{Music, ATTR_AUTHOR, ATTR_COMMENT, ATTR_TITLE};
use crate::error::LibResult;
use snafu::ResultExt;
use std::io::Write;

/// Maximum length of each field.
const FIELD_LEN: usize = 256;

/// Name written into the trailer's program field, truncated to its
/// traditional nine bytes.
const PROGRAM_NAME: &[u8; 9] = b"gamemusic";

fn read_string(data: &[u8], pos: &mut usize) -> String {
    let start = *pos;
    let mut end = start;
    while end < data.len() && end - start < FIELD_LEN && data[end] != 0 {
        end += 1;
    }
    // Step over the terminator when there is one.
    *pos = if end < data.len() { end + 1 } else { end };
    String::from_utf8_lossy(&data[start..end]).into_owned()
}

/// Parse a tag trailer, if present, into the song's attributes.  `data` is
/// the remainder of the file after the song data; absent or malformed tags
/// are simply ignored.
pub(crate) fn read_tags(data: &[u8], music: &mut Music) {
    if data.first() != Some(&0x1A) {
        return;
    }
    let mut pos = 1;
    let title = read_string(data, &mut pos);
    let composer = read_string(data, &mut pos);
    let comments = read_string(data, &mut pos);
    music.set_attribute(ATTR_TITLE, "Song title", title);
    music.set_attribute(ATTR_AUTHOR, "Song composer/arranger/artist", composer);
    music.set_attribute(ATTR_COMMENT, "Comments", comments);
}

fn write_string<W: Write>(w: &mut W, text: &str) -> LibResult<()> {
    let bytes = text.as_bytes();
    let len = bytes.len().min(FIELD_LEN - 1);
    w.write_all(&bytes[..len]).context(wr!())?;
    write_u8!(w, 0)?;
    Ok(())
}

/// Append a tag trailer when the song carries any text attributes.
pub(crate) fn write_tags<W: Write>(w: &mut W, music: &Music) -> LibResult<()> {
    let title = music.attribute(ATTR_TITLE).map(|a| a.text.as_str()).unwrap_or("");
    let composer = music
        .attribute(ATTR_AUTHOR)
        .map(|a| a.text.as_str())
        .unwrap_or("");
    let comments = music
        .attribute(ATTR_COMMENT)
        .map(|a| a.text.as_str())
        .unwrap_or("");
    if title.is_empty() && composer.is_empty() && comments.is_empty() {
        return Ok(());
    }
    write_u8!(w, 0x1A)?;
    write_string(w, title)?;
    write_string(w, composer)?;
    write_string(w, comments)?;
    w.write_all(PROGRAM_NAME).context(wr!())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut music = Music::default();
        music.set_attribute(ATTR_TITLE, "Song title", String::from("Boss Fight"));
        music.set_attribute(
            ATTR_AUTHOR,
            "Song composer/arranger/artist",
            String::from("A. Composer"),
        );

        let mut bytes = Vec::new();
        write_tags(&mut bytes, &music).unwrap();
        assert_eq!(bytes[0], 0x1A);

        let mut back = Music::default();
        read_tags(&bytes, &mut back);
        assert_eq!(back.attribute(ATTR_TITLE).unwrap().text, "Boss Fight");
        assert_eq!(back.attribute(ATTR_AUTHOR).unwrap().text, "A. Composer");
        assert_eq!(back.attribute(ATTR_COMMENT).unwrap().text, "");
    }

    #[test]
    fn no_tags_no_trailer() {
        let music = Music::default();
        let mut bytes = Vec::new();
        write_tags(&mut bytes, &music).unwrap();
        assert!(bytes.is_empty());

        let mut back = Music::default();
        read_tags(&[], &mut back);
        assert!(back.attributes.is_empty());
    }
}
