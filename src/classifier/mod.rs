//! Output-stream filtering and first-error isolation.
//!
//! Everything here is pure text processing. [`StreamClassifier`] restricts a
//! transcript to the regions between a package's start banner and its
//! finished/failed banner, and is tolerant of input arriving in arbitrary
//! chunks: a line split across two chunks is reassembled before it is
//! classified, so a chunked feed always produces the same output as one pass
//! over the full text.
//!
//! [`first_error`] runs once over a complete transcript and extracts the
//! block of lines belonging to the first compiler or linker error.

use crate::config::Markers;

/// Opens a candidate error block: a compiler diagnostic line.
const ERROR_MARKER: &str = "error: ";
/// Opens a candidate error block: an unresolved-symbol linker line.
const LINKER_MARKER: &str = "undefined reference to ";
/// Closes an open error block.
const STOP_MARKERS: [&str; 5] = [
    ERROR_MARKER,
    LINKER_MARKER,
    "note: ",
    "In file included from ",
    "Error 1",
];

/// Banner printed above the repeated first error, followed by a divider line
/// of 79 periods.
const FIRST_ERROR_HEADER: &str = "\nErrors encountered, reprinting first error:\n\
...............................................................................\n";

/// Warning catkin prints when it cannot size the terminal; never worth
/// forwarding to a sink.
pub const TERMINAL_WIDTH_NOTICE: &str =
    "NOTICE: Could not determine the width of the terminal.";

/// Line-oriented banner filter that survives arbitrary chunk boundaries.
///
/// State is owned by exactly one session; create a fresh classifier per
/// build. Text after the last line break of a chunk is held back in `pending`
/// and classified once its terminating break arrives (or at [`finish`]).
///
/// [`finish`]: StreamClassifier::finish
#[derive(Debug)]
pub struct StreamClassifier {
    markers: Markers,
    inside_banner: bool,
    pending: String,
}

impl StreamClassifier {
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            inside_banner: false,
            pending: String::new(),
        }
    }

    /// Feed one chunk of text, returning the newly kept portion.
    ///
    /// Only complete lines are classified; an unterminated trailing fragment
    /// is carried into the next call. Kept lines are re-terminated with a
    /// single `\n`.
    pub fn push_chunk(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let text = std::mem::take(&mut self.pending);

        let mut out = String::new();
        let mut rest = text.as_str();
        while let Some(pos) = rest.find('\n') {
            self.classify_line(&rest[..pos], &mut out);
            rest = &rest[pos + 1..];
        }
        self.pending = rest.to_string();
        out
    }

    /// End of input: classify any leftover fragment as a final line and reset
    /// the classifier for reuse.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.classify_line(&line, &mut out);
        }
        self.inside_banner = false;
        out
    }

    /// Filter a complete transcript in one call.
    pub fn filter(&mut self, text: &str) -> String {
        let mut out = self.push_chunk(text);
        out.push_str(&self.finish());
        out
    }

    // The terminating banner is checked after the append so the Finished/
    // Failed line itself stays in the output.
    fn classify_line(&mut self, line: &str, out: &mut String) {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.contains(self.markers.start) {
            self.inside_banner = true;
        }
        if self.inside_banner {
            out.push_str(line);
            out.push('\n');
        }
        if line.contains(self.markers.finished) || line.contains(self.markers.failed) {
            self.inside_banner = false;
        }
    }
}

/// Extract the first error block from a complete transcript.
///
/// A compiler diagnostic or an unresolved-symbol linker line opens the block
/// exactly once per transcript; any later diagnostic, "included from" trace,
/// or terminal `Error 1` sentinel closes it (the closing line is excluded).
/// Returns `None` for an error-free transcript, otherwise the block prefixed
/// with a banner and divider, with its final line break removed.
pub fn first_error(text: &str) -> Option<String> {
    let mut err_free = true;
    let mut keep = false;
    let mut block = String::from(FIRST_ERROR_HEADER);

    for line in text.lines() {
        if err_free && (line.contains(ERROR_MARKER) || line.contains(LINKER_MARKER)) {
            keep = true;
            err_free = false;
        } else if STOP_MARKERS.iter().any(|m| line.contains(m)) {
            keep = false;
        }

        if keep {
            block.push_str(line);
            block.push('\n');
        }
    }

    if err_free {
        None
    } else {
        block.pop();
        Some(block)
    }
}

/// Replace every literal `?` with `replacement`.
///
/// Catkin emits `?` where a bold-text escape belongs; the batch presentation
/// deletes them and the live presentation substitutes an apostrophe.
pub fn strip_question_marks(text: &str, replacement: &str) -> String {
    text.replace('?', replacement)
}

/// Collapse `\r\n` and bare `\r` to `\n` for sinks that require a
/// single-character line separator.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Drop lines carrying catkin's terminal-width warning.
pub fn suppress_width_notice(text: &str) -> String {
    if !text.contains(TERMINAL_WIDTH_NOTICE) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if !line.contains(TERMINAL_WIDTH_NOTICE) {
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filter_plain(text: &str) -> String {
        StreamClassifier::new(Markers::plain()).filter(text)
    }

    #[test]
    fn keeps_banner_region_and_terminating_line() {
        let text = "Starting >>> pkg_a\ncompiling pkg_a\nFinished <<< pkg_a\n";
        assert_eq!(filter_plain(text), text);
    }

    #[test]
    fn discards_everything_outside_banners() {
        let text = "[build 1 of 3]\nwarming caches\nStarting >>> pkg\nbuilding\n\
Finished <<< pkg\ntrailing chatter\n";
        assert_eq!(filter_plain(text), "Starting >>> pkg\nbuilding\nFinished <<< pkg\n");
    }

    #[test]
    fn no_start_marker_yields_empty_output() {
        let text = "lots of\nunrelated chatter\nFinished <<< pkg\n";
        assert_eq!(filter_plain(text), "");
    }

    #[test]
    fn failed_banner_also_terminates_region() {
        let text = "Starting >>> pkg\nerror: boom\nFailed <<< pkg\nafter\n";
        assert_eq!(
            filter_plain(text),
            "Starting >>> pkg\nerror: boom\nFailed <<< pkg\n"
        );
    }

    #[test]
    fn ansi_markers_match_colored_output() {
        let text = "Starting  \x1b[1m\x1b[32m>>>\x1b[0m pkg\nbuilding\n\
\x1b[1m\x1b[30mFinished\x1b[0m  \x1b[32m<<<\x1b[0m pkg\n";
        let out = StreamClassifier::new(Markers::ansi()).filter(text);
        assert_eq!(out, text);
    }

    #[test]
    fn marker_split_across_chunks_is_reassembled() {
        let mut classifier = StreamClassifier::new(Markers::plain());
        let mut out = classifier.push_chunk("Starting >>> p");
        out.push_str(&classifier.push_chunk("kg\nFinished <<< pkg\n"));
        out.push_str(&classifier.finish());
        assert_eq!(out, "Starting >>> pkg\nFinished <<< pkg\n");
    }

    #[test]
    fn unterminated_final_line_is_classified_at_finish() {
        let mut classifier = StreamClassifier::new(Markers::plain());
        let mut out = classifier.push_chunk("Starting >>> pkg\nstill building");
        assert_eq!(out, "Starting >>> pkg\n");
        out.push_str(&classifier.finish());
        assert_eq!(out, "Starting >>> pkg\nstill building\n");
    }

    #[test]
    fn classifier_is_reusable_after_finish() {
        let mut classifier = StreamClassifier::new(Markers::plain());
        classifier.push_chunk("Starting >>> a\nbody");
        classifier.finish();
        assert_eq!(classifier.filter("outside banner\n"), "");
    }

    #[test]
    fn crlf_input_is_kept_with_lf_terminators() {
        let text = "Starting >>> pkg\r\nbuilding\r\nFinished <<< pkg\r\n";
        assert_eq!(
            filter_plain(text),
            "Starting >>> pkg\nbuilding\nFinished <<< pkg\n"
        );
    }

    #[test]
    fn first_error_isolates_single_block() {
        let text = "Starting >>> pkg\n\
error: 'foo' was not declared\n\
note: suggested fix\n\
Error 1\n";
        let block = first_error(text).unwrap();
        assert!(block.starts_with("\nErrors encountered, reprinting first error:\n"));
        assert!(block.contains("error: 'foo' was not declared"));
        assert!(!block.contains("note: suggested fix"));
        assert!(!block.contains("Error 1"));
        assert!(!block.ends_with('\n'));
    }

    #[test]
    fn first_error_keeps_context_lines_until_stop_marker() {
        let text = "src/a.cpp:3:5: error: 'foo' was not declared\n\
    foo(bar);\n\
    ^~~\n\
note: declared here\n";
        let block = first_error(text).unwrap();
        assert!(block.contains("foo(bar);"));
        assert!(block.contains("^~~"));
        assert!(!block.contains("note: declared here"));
    }

    #[test]
    fn first_error_latch_ignores_second_error() {
        let text = "error: first\nnote: stop\nerror: second\nnote: stop again\n";
        let block = first_error(text).unwrap();
        assert!(block.contains("error: first"));
        assert!(!block.contains("error: second"));
    }

    #[test]
    fn linker_line_opens_error_block() {
        let text = "a.o: undefined reference to `foo()'\ncollect2: error: ld returned 1\n";
        let block = first_error(text).unwrap();
        assert!(block.contains("undefined reference to `foo()'"));
        assert!(!block.contains("collect2"));
    }

    #[test]
    fn error_free_transcript_yields_none() {
        assert_eq!(first_error("Starting >>> pkg\nFinished <<< pkg\n"), None);
        assert_eq!(first_error(""), None);
    }

    #[test]
    fn divider_is_79_periods() {
        let block = first_error("error: x\n").unwrap();
        let divider = block.lines().nth(2).unwrap();
        assert_eq!(divider.len(), 79);
        assert!(divider.chars().all(|c| c == '.'));
    }

    #[test]
    fn question_marks_are_replaced() {
        assert_eq!(strip_question_marks("what? really?", ""), "what really");
        assert_eq!(strip_question_marks("what? really?", "'"), "what' really'");
        assert_eq!(strip_question_marks("clean", "'"), "clean");
    }

    #[test]
    fn newlines_are_normalized() {
        assert_eq!(normalize_newlines("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn width_notice_lines_are_suppressed() {
        let text = format!("before\n{TERMINAL_WIDTH_NOTICE}\nafter\n");
        assert_eq!(suppress_width_notice(&text), "before\nafter\n");
        assert_eq!(suppress_width_notice("clean\n"), "clean\n");
    }

    proptest! {
        // Chunk invariance: any partition of the input produces the same
        // filtered output as a single pass.
        #[test]
        fn chunked_feed_matches_batch_filter(
            lines in prop::collection::vec("[ -~]{0,30}", 0..20),
            cuts in prop::collection::vec(0usize..200, 0..8),
        ) {
            let mut text = String::new();
            for (i, line) in lines.iter().enumerate() {
                match i % 4 {
                    0 => text.push_str("Starting >>> pkg\n"),
                    1 => { text.push_str(line); text.push('\n'); }
                    2 => text.push_str("Finished <<< pkg\n"),
                    _ => { text.push_str(line); text.push('\n'); }
                }
            }

            let expected = StreamClassifier::new(Markers::plain()).filter(&text);

            let mut offsets: Vec<usize> = cuts
                .into_iter()
                .map(|c| c % (text.len() + 1))
                .collect();
            offsets.push(0);
            offsets.push(text.len());
            offsets.sort_unstable();
            offsets.dedup();

            let mut classifier = StreamClassifier::new(Markers::plain());
            let mut chunked = String::new();
            for window in offsets.windows(2) {
                chunked.push_str(&classifier.push_chunk(&text[window[0]..window[1]]));
            }
            chunked.push_str(&classifier.finish());

            prop_assert_eq!(chunked, expected);
        }

        #[test]
        fn question_mark_replacement_leaves_no_question_marks(
            s in "[ -~]{0,64}",
            replacement in prop::sample::select(vec!["", "'"]),
        ) {
            let out = strip_question_marks(&s, replacement);
            prop_assert_eq!(out.matches('?').count(), 0);
            let q = s.matches('?').count();
            let delta = out.len() as isize - s.len() as isize;
            prop_assert_eq!(delta, q as isize * (replacement.len() as isize - 1));
        }
    }
}
