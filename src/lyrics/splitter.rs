//! Word-chunking of generated lyrics.

/// Split `lyrics` into chunks of at most `max_words` whitespace-separated
/// words, each joined by single spaces.
///
/// `max_words == 0` is treated as 1.
pub fn split_lyrics(lyrics: &str, max_words: usize) -> Vec<String> {
    let words: Vec<&str> = lyrics.split_whitespace().collect();
    words
        .chunks(max_words.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}
