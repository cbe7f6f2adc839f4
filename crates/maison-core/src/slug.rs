use std::collections::BTreeSet;

/// Base used when a title contains no usable characters at all.
pub const FALLBACK_SLUG_BASE: &str = "listing";

/// Derives the base slug candidate for a listing title: diacritics folded
/// to ASCII, lowercased, every run of non-alphanumerics collapsed into a
/// single hyphen, leading and trailing hyphens trimmed.
pub fn slug_base(input: &str) -> String {
    let folded = deunicode::deunicode(input);
    let mut out = String::with_capacity(folded.len());
    let mut prev_dash = false;
    for ch in folded.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        FALLBACK_SLUG_BASE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Working set of every slug currently assigned, existing rows included.
/// Allocation reserves the returned candidate immediately so the next
/// caller's collision check sees it, even if the caller's write later
/// fails.
#[derive(Debug, Clone, Default)]
pub struct SlugAllocator {
    taken: BTreeSet<String>,
}

impl SlugAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a slug as taken without deriving it from a title.
    pub fn reserve(&mut self, slug: impl Into<String>) {
        self.taken.insert(slug.into());
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.taken.contains(slug)
    }

    /// Returns a slug for `title` that collides with nothing reserved so
    /// far, suffixing `-2`, `-3`, … past the base candidate if needed.
    pub fn allocate(&mut self, title: &str) -> String {
        let base = slug_base(title);
        let mut candidate = base.clone();
        let mut suffix = 2u64;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}
