//! Text splitting primitives; every length here is counted in characters

/// Number of characters in `s`
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offsets of every char boundary, including the end of the string
fn boundaries(s: &str) -> Vec<usize> {
    s.char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(s.len()))
        .collect()
}

/// Last `n` characters of `s`
pub fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if n >= len {
        return s;
    }
    let bounds = boundaries(s);
    &s[bounds[len - n]..]
}

/// Char offset of a byte offset inside `s`
pub fn char_offset(s: &str, byte_offset: usize) -> usize {
    s[..byte_offset.min(s.len())].chars().count()
}

/// Window `[start, end)` char ranges of at most `size` chars sharing `overlap` chars.
///
/// A remainder shorter than `min_tail` is absorbed into the last window instead
/// of becoming a window of its own.
pub fn windows(len: usize, size: usize, overlap: usize, min_tail: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    if len == 0 || size == 0 {
        return ranges;
    }

    let overlap = overlap.min(size - 1);
    let mut start = 0;
    loop {
        let mut end = (start + size).min(len);
        if len - end < min_tail {
            end = len;
        }
        ranges.push((start, end));
        if end >= len {
            break;
        }
        start = end - overlap;
    }
    ranges
}

/// Cut `text` into consecutive pieces of at most `size` chars
pub fn hard_split(text: &str, size: usize) -> Vec<String> {
    let bounds = boundaries(text);
    windows(bounds.len() - 1, size, 0, 0)
        .into_iter()
        .map(|(start, end)| text[bounds[start]..bounds[end]].to_string())
        .collect()
}

/// Slice of `text` covering char range `[start, end)`
pub fn slice_chars(text: &str, start: usize, end: usize) -> &str {
    let bounds = boundaries(text);
    let last = bounds.len() - 1;
    &text[bounds[start.min(last)]..bounds[end.min(last)]]
}

/// Paragraphs separated by one or more blank lines, trimmed
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n").trim().to_string());
    }

    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

/// Sentences ending in `.`, `!` or `?` where the next sentence starts with an uppercase letter
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    let mut push = |sentence: &str| {
        let sentence = sentence.trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
    };

    while i < chars.len() {
        if !matches!(chars[i].1, '.' | '!' | '?') {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len() && matches!(chars[j].1, '.' | '!' | '?') {
            j += 1;
        }
        let punct_end = chars.get(j).map(|(b, _)| *b).unwrap_or(text.len());

        let mut k = j;
        while k < chars.len() && chars[k].1.is_whitespace() {
            k += 1;
        }

        if k > j && k < chars.len() && chars[k].1.is_uppercase() {
            push(&text[start..punct_end]);
            start = chars[k].0;
            i = k;
        } else {
            i = j;
        }
    }
    push(&text[start..]);

    sentences
}

/// Greedily pack pieces into groups whose summed length stays within `budget`.
///
/// Pieces longer than the budget are hard-split first. Lengths are summed
/// without separators.
pub fn pack(pieces: &[String], budget: usize, separator: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_size = 0;

    let units = pieces.iter().flat_map(|piece| {
        if char_len(piece) > budget && budget > 0 {
            hard_split(piece, budget)
        } else {
            vec![piece.clone()]
        }
    });

    for unit in units {
        let size = char_len(&unit);
        if current_size + size > budget && !current.is_empty() {
            groups.push(current.join(separator));
            current.clear();
            current_size = 0;
        }
        current_size += size;
        current.push(unit);
    }
    if !current.is_empty() {
        groups.push(current.join(separator));
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_overlap_and_tail_absorption() {
        assert_eq!(windows(10, 4, 1, 0), vec![(0, 4), (3, 7), (6, 10)]);
        // remainder of 1 char is folded into the previous window
        assert_eq!(windows(9, 4, 0, 2), vec![(0, 4), (4, 9)]);
        assert_eq!(windows(3, 4, 1, 0), vec![(0, 3)]);
        assert!(windows(0, 4, 1, 0).is_empty());
    }

    #[test]
    fn test_tail_and_slice_are_char_safe() {
        assert_eq!(tail_chars("délai", 3), "lai");
        assert_eq!(tail_chars("été", 10), "été");
        assert_eq!(slice_chars("été long", 0, 3), "été");
        assert_eq!(char_offset("été", "ét".len()), 2);
    }

    #[test]
    fn test_split_paragraphs() {
        let text = "Premier paragraphe.\nSuite.\n\n  \n\nDeuxième paragraphe.\n\n";
        assert_eq!(
            split_paragraphs(text),
            vec!["Premier paragraphe.\nSuite.", "Deuxième paragraphe."]
        );
    }

    #[test]
    fn test_split_sentences() {
        let text = "Le marché est attribué. Le délai est de 3 mois! Est-ce clair? oui. Fin...  Voilà";
        assert_eq!(
            split_sentences(text),
            vec![
                "Le marché est attribué.",
                "Le délai est de 3 mois!",
                "Est-ce clair? oui.",
                "Fin...",
                "Voilà"
            ]
        );
        assert_eq!(split_sentences("Article 3.2 du CCAP"), vec!["Article 3.2 du CCAP"]);
    }

    #[test]
    fn test_pack_respects_budget() {
        let pieces: Vec<String> = vec!["aaaa".into(), "bbb".into(), "cc".into(), "dddddddddd".into()];
        let groups = pack(&pieces, 7, " ");
        assert_eq!(groups, vec!["aaaa bbb", "cc", "ddddddd", "ddd"]);
    }
}
