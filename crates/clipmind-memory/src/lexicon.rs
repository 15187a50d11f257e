//! Shared vocabulary for keyword extraction and domain inference

/// Words ignored by keyword extraction
pub const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "onto", "are", "was", "were",
    "been", "being", "have", "has", "had", "but", "not", "you", "your", "our", "out", "all",
    "can", "will", "would", "should", "could", "make", "please", "some", "any", "more", "most",
    "very", "just", "also", "than", "then", "them", "they", "their", "there", "what", "when",
    "where", "which", "who", "how", "why", "its", "use", "using", "about", "over", "under",
    "add", "want", "need", "like", "get",
];

/// Maximum number of keywords kept per query
pub const MAX_KEYWORDS: usize = 15;

/// Content domains recognised by retrieval and context assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Motion and transitions
    Animation,
    /// Music, SFX and voice
    Audio,
    /// Colors, fonts and layout
    Visual,
    /// Scenes, sequencing and templates
    Structure,
    /// Anything else
    General,
}

impl Domain {
    /// Lowercase name, also used as a store category
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Animation => "animation",
            Domain::Audio => "audio",
            Domain::Visual => "visual",
            Domain::Structure => "structure",
            Domain::General => "general",
        }
    }

    /// Lexicon words for the domain
    pub fn lexicon(&self) -> &'static [&'static str] {
        match self {
            Domain::Animation => &[
                "animate",
                "animation",
                "motion",
                "transition",
                "fade",
                "slide",
                "bounce",
                "easing",
                "keyframe",
                "zoom",
            ],
            Domain::Audio => &[
                "audio",
                "music",
                "sound",
                "sfx",
                "soundtrack",
                "beat",
                "volume",
                "voice",
                "narration",
            ],
            Domain::Visual => &[
                "color",
                "visual",
                "image",
                "style",
                "font",
                "layout",
                "background",
                "theme",
                "palette",
            ],
            Domain::Structure => &[
                "scene",
                "sequence",
                "structure",
                "timeline",
                "composition",
                "template",
                "intro",
                "outro",
                "duration",
            ],
            Domain::General => &[],
        }
    }

    /// Specific domains in lexicon precedence order
    pub const SPECIFIC: [Domain; 4] = [
        Domain::Animation,
        Domain::Audio,
        Domain::Visual,
        Domain::Structure,
    ];
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased, stop-word-free, deduplicated keywords longer than two chars
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
    {
        if STOP_WORDS.contains(&word) || keywords.iter().any(|k| k == word) {
            continue;
        }
        keywords.push(word.to_string());
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }

    keywords
}

/// Vote keywords against the lexicon; a domain needs at least two hits
pub fn infer_domain(keywords: &[String]) -> Domain {
    let mut best = Domain::General;
    let mut best_hits = 1;

    for domain in Domain::SPECIFIC {
        let hits = keywords
            .iter()
            .filter(|k| domain.lexicon().contains(&k.as_str()))
            .count();
        if hits > best_hits {
            best = domain;
            best_hits = hits;
        }
    }

    best
}

/// First domain whose lexicon contains one of the text's words
pub fn first_domain_match(text: &str) -> Domain {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    Domain::SPECIFIC
        .into_iter()
        .find(|domain| {
            domain
                .lexicon()
                .iter()
                .any(|lex| words.iter().any(|w| word_matches(w, lex)))
        })
        .unwrap_or(Domain::General)
}

/// Exact word or a plain plural of it
fn word_matches(word: &str, lex: &str) -> bool {
    word == lex || word.strip_suffix('s') == Some(lex)
}
