// Process-lifetime delimiter markers.
//
// Tool calls are framed in model output with rare Unicode sequences instead of
// a structured wire format. The eight markers are assembled from one row of a
// fixed delimiter-triple pool and two suffix glyphs from a fixed CJK pool,
// chosen once at process start. A stable set for the process lifetime is
// required: multi-turn conversations carry previously-encoded tool calls in
// their history, and those must still parse on later turns.

/// Delimiter triples `(open, close, mid)`.
const DELIMITER_TRIPLES: [(&str, &str, &str); 6] = [
    ("༒", "༒", "࿇"),
    ("꧁", "꧂", "࿔"),
    ("᎒", "᎒", "᎓"),
    ("ꆈ", "ꆈ", "ꊰ"),
    ("꩜", "꩜", "꩟"),
    ("ꓸ", "ꓸ", "ꓹ"),
];

/// Rare CJK suffix glyphs appended to the envelope delimiters.
const SUFFIX_GLYPHS: [&str; 20] = [
    "龘", "靐", "齉", "麤", "爨", "驫", "鱻", "羴", "犇", "骉", "飝", "厵", "靇", "飍", "馫", "灥",
    "厽", "叒", "叕", "芔",
];

/// The eight marker strings framing tool-call regions in model text.
///
/// Immutable after construction; pass by reference into the composer,
/// rewriter, and parsers rather than reaching for ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    pub tc_start: String,
    pub tc_end: String,
    pub name_start: String,
    pub name_end: String,
    pub args_start: String,
    pub args_end: String,
    pub result_start: String,
    pub result_end: String,
}

impl MarkerSet {
    /// Pick a fresh marker set uniformly from the joint pool space.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_picks(
            fastrand::usize(..DELIMITER_TRIPLES.len()),
            fastrand::usize(..SUFFIX_GLYPHS.len()),
            fastrand::usize(..SUFFIX_GLYPHS.len()),
        )
    }

    /// Build the marker set from explicit pool indices.
    ///
    /// Deterministic; used by tests and by [`MarkerSet::generate`]. Indices
    /// wrap around the pool sizes.
    #[must_use]
    pub fn from_picks(triple: usize, suffix_a: usize, suffix_b: usize) -> Self {
        let (open, close, mid) = DELIMITER_TRIPLES[triple % DELIMITER_TRIPLES.len()];
        let s1 = SUFFIX_GLYPHS[suffix_a % SUFFIX_GLYPHS.len()];
        let s2 = SUFFIX_GLYPHS[suffix_b % SUFFIX_GLYPHS.len()];

        Self {
            tc_start: format!("{open}{s1}ᐅ"),
            tc_end: format!("ᐊ{s1}{close}"),
            name_start: format!("{mid}▸"),
            name_end: format!("◂{mid}"),
            args_start: format!("{mid}▹"),
            args_end: format!("◃{mid}"),
            result_start: format!("{open}{s2}⟫"),
            result_end: format!("⟪{s2}{close}"),
        }
    }

    /// First code point of the tool-call opening marker.
    ///
    /// The streaming transcoder uses this to decide whether a text tail could
    /// be the beginning of an envelope split across chunks.
    #[must_use]
    pub fn tc_start_first_char(&self) -> char {
        self.tc_start.chars().next().unwrap_or('\0')
    }

    fn all(&self) -> [&str; 8] {
        [
            &self.tc_start,
            &self.tc_end,
            &self.name_start,
            &self.name_end,
            &self.args_start,
            &self.args_end,
            &self.result_start,
            &self.result_end,
        ]
    }
}
