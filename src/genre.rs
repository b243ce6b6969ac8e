//! Genre presets and prompt assembly.

use serde::Serialize;

/// Story genre. Every label outside the preset table resolves to
/// [`Genre::Classic`], which carries the generic fairy-tale opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Genre {
    Fantasy,
    SciFi,
    Mystery,
    Romance,
    Adventure,
    Classic,
}

impl Genre {
    /// Selectable presets, in display order.
    pub const PRESETS: [Genre; 5] = [
        Genre::Fantasy,
        Genre::SciFi,
        Genre::Mystery,
        Genre::Romance,
        Genre::Adventure,
    ];

    /// Initial selection on the page.
    pub const DEFAULT_SELECTION: Genre = Genre::Fantasy;

    /// Exact, case-sensitive lookup.
    pub fn from_label(label: &str) -> Genre {
        Self::PRESETS
            .into_iter()
            .find(|genre| genre.label() == label)
            .unwrap_or(Genre::Classic)
    }

    pub fn label(self) -> &'static str {
        match self {
            Genre::Fantasy => "Fantasy",
            Genre::SciFi => "Sci-Fi",
            Genre::Mystery => "Mystery",
            Genre::Romance => "Romance",
            Genre::Adventure => "Adventure",
            Genre::Classic => "Classic",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Genre::Fantasy => "In a realm where dragons soar and magic flows, ",
            Genre::SciFi => "In the year 2478, humanity had reached the edge of the galaxy. ",
            Genre::Mystery => "The room was quiet, but the blood on the floor whispered secrets. ",
            Genre::Romance => "Under the Parisian sky, their eyes met for the first time. ",
            Genre::Adventure => "With only a compass and a map, she stepped into the unknown. ",
            Genre::Classic => "Once upon a time, ",
        }
    }

    pub fn preset(self) -> GenrePreset {
        GenrePreset {
            label: self.label(),
            prefix: self.prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenrePreset {
    pub label: &'static str,
    pub prefix: &'static str,
}

/// Genre prefix immediately followed by the trimmed custom prompt.
pub fn assemble_prompt(genre: Genre, custom_prompt: &str) -> String {
    let mut prompt = String::with_capacity(genre.prefix().len() + custom_prompt.len());
    prompt.push_str(genre.prefix());
    prompt.push_str(custom_prompt.trim());
    prompt
}
