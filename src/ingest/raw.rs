//! Generic XML subtree representation and per-kind field extraction.
//!
//! The Discogs dump schema nests child elements arbitrarily deep (a `label`
//! element can itself contain nested `label` elements under `sublabels`), so
//! rather than hand-writing a parser per element we build one small
//! structural tree and pick named children off it. This keeps the decoder
//! (§4.2) agnostic to the exact shape of any one dump kind.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub attrs: HashMap<String, String>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(|c| c.text.trim().to_string()).filter(|s| !s.is_empty())
    }

    pub fn child_i64(&self, name: &str) -> Option<i64> {
        self.child_text(name).and_then(|t| t.parse().ok())
    }

    pub fn trimmed_text(&self) -> String {
        self.text.trim().to_string()
    }
}

/// Fields lifted off a parsed `<artist>` subtree, already in storage shape
/// except for the generated `id`/`updated_at` the buffer worker assigns.
#[derive(Debug, Clone)]
pub struct RawArtist {
    pub natural_key: i64,
    pub name: String,
    pub real_name: Option<String>,
    pub profile: Option<String>,
    pub data_quality: Option<String>,
    pub images: Vec<RawImage>,
    /// Nested `<artists><artist>` references embedded in release/master
    /// subtrees materialize as bare stub artists here (name only, no profile).
    pub nested_artist_refs: Vec<(i64, String)>,
}

#[derive(Debug, Clone)]
pub struct RawLabel {
    pub natural_key: i64,
    pub name: String,
    pub contact_info: Option<String>,
    pub profile: Option<String>,
    pub parent_label_key: Option<i64>,
    pub images: Vec<RawImage>,
}

#[derive(Debug, Clone)]
pub struct RawMaster {
    pub natural_key: i64,
    pub title: String,
    pub year: Option<i32>,
    pub main_release_key: Option<i64>,
    pub data_quality: Option<String>,
    pub images: Vec<RawImage>,
    pub genres: Vec<(String, bool)>, // (name, is_style)
    pub artist_refs: Vec<(i64, String, Option<String>, Option<i32>)>, // (artist_key, name, role, position)
}

#[derive(Debug, Clone)]
pub struct RawRelease {
    pub natural_key: i64,
    pub title: String,
    pub master_key: Option<i64>,
    pub country: Option<String>,
    pub released: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub images: Vec<RawImage>,
    pub genres: Vec<(String, bool)>,
    pub artist_refs: Vec<(i64, String)>,
}

#[derive(Debug, Clone)]
pub struct RawImage {
    pub url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

fn parse_images(node: &XmlNode) -> Vec<RawImage> {
    let Some(images_node) = node.child("images") else {
        return Vec::new();
    };
    images_node
        .children_named("image")
        .map(|img| RawImage {
            url: img.attrs.get("uri").cloned().unwrap_or_default(),
            width: img.attrs.get("width").and_then(|w| w.parse().ok()),
            height: img.attrs.get("height").and_then(|h| h.parse().ok()),
        })
        .filter(|img| !img.url.is_empty())
        .collect()
}

fn parse_genre_style_pairs(node: &XmlNode) -> Vec<(String, bool)> {
    let mut pairs = Vec::new();
    if let Some(genres) = node.child("genres") {
        for g in genres.children_named("genre") {
            let name = g.trimmed_text();
            if !name.is_empty() {
                pairs.push((name, false));
            }
        }
    }
    if let Some(styles) = node.child("styles") {
        for s in styles.children_named("style") {
            let name = s.trimmed_text();
            if !name.is_empty() {
                pairs.push((name, true));
            }
        }
    }
    pairs
}

pub fn parse_artist(node: &XmlNode) -> Option<RawArtist> {
    let natural_key = node.child_i64("id")?;
    if natural_key <= 0 {
        return None;
    }
    let name = node.child_text("name")?;
    Some(RawArtist {
        natural_key,
        name,
        real_name: node.child_text("realname"),
        profile: node.child_text("profile"),
        data_quality: node.child_text("data_quality"),
        images: parse_images(node),
        nested_artist_refs: Vec::new(),
    })
}

pub fn parse_label(node: &XmlNode) -> Option<RawLabel> {
    let natural_key = node.child_i64("id")?;
    if natural_key <= 0 {
        return None;
    }
    let name = node.child_text("name")?;
    let parent_label_key = node.child("parentLabel").and_then(|p| p.attrs.get("id")).and_then(|id| id.parse().ok());
    Some(RawLabel {
        natural_key,
        name,
        contact_info: node.child_text("contactinfo"),
        profile: node.child_text("profile"),
        parent_label_key,
        images: parse_images(node),
    })
}

fn parse_artist_refs(node: &XmlNode) -> Vec<(i64, String, Option<String>, Option<i32>)> {
    let Some(artists) = node.child("artists") else {
        return Vec::new();
    };
    artists
        .children_named("artist")
        .filter_map(|a| {
            let key = a.child_i64("id")?;
            let name = a.child_text("name")?;
            if key <= 0 {
                return None;
            }
            let role = a.child_text("role");
            let position = a.child_text("position").and_then(|p| p.parse().ok());
            Some((key, name, role, position))
        })
        .collect()
}

pub fn parse_master(node: &XmlNode) -> Option<RawMaster> {
    let natural_key = node.child_i64("id")?;
    if natural_key <= 0 {
        return None;
    }
    let title = node.child_text("title")?;
    Some(RawMaster {
        natural_key,
        title,
        year: node.child_text("year").and_then(|y| y.parse().ok()),
        main_release_key: node.child_i64("main_release"),
        data_quality: node.child_text("data_quality"),
        images: parse_images(node),
        genres: parse_genre_style_pairs(node),
        artist_refs: parse_artist_refs(node),
    })
}

pub fn parse_release(node: &XmlNode) -> Option<RawRelease> {
    let natural_key = node
        .attrs
        .get("id")
        .and_then(|id| id.parse().ok())
        .or_else(|| node.child_i64("id"))?;
    if natural_key <= 0 {
        return None;
    }
    let title = node.child_text("title")?;
    let artist_refs = parse_artist_refs(node)
        .into_iter()
        .map(|(key, name, _, _)| (key, name))
        .collect();
    Some(RawRelease {
        natural_key,
        title,
        master_key: node.child_i64("master_id"),
        country: node.child_text("country"),
        released: node.child_text("released"),
        status: node.attrs.get("status").cloned().or_else(|| node.child_text("status")),
        notes: node.child_text("notes"),
        images: parse_images(node),
        genres: parse_genre_style_pairs(node),
        artist_refs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn node(name: &str, text: &str, children: Vec<XmlNode>) -> XmlNode {
        XmlNode {
            name: name.to_string(),
            attrs: HashMap::new(),
            text: text.to_string(),
            children,
        }
    }

    #[test]
    fn parses_minimal_artist() {
        let artist = node(
            "artist",
            "",
            vec![node("id", "42", vec![]), node("name", "Four Tet", vec![])],
        );
        let parsed = parse_artist(&artist).expect("should parse");
        assert_eq!(parsed.natural_key, 42);
        assert_eq!(parsed.name, "Four Tet");
    }

    #[test]
    fn rejects_non_positive_natural_key() {
        let artist = node(
            "artist",
            "",
            vec![node("id", "0", vec![]), node("name", "Unknown", vec![])],
        );
        assert!(parse_artist(&artist).is_none());
    }

    #[rstest]
    #[case("-5", false)]
    #[case("0", false)]
    #[case("1", true)]
    #[case("42", true)]
    fn natural_key_sign_gates_parsing(#[case] id: &str, #[case] should_parse: bool) {
        let artist = node("artist", "", vec![node("id", id, vec![]), node("name", "X", vec![])]);
        assert_eq!(parse_artist(&artist).is_some(), should_parse);

        let label = node("label", "", vec![node("id", id, vec![]), node("name", "X", vec![])]);
        assert_eq!(parse_label(&label).is_some(), should_parse);
    }

    #[test]
    fn parses_genres_and_styles_separately() {
        let master = node(
            "master",
            "",
            vec![
                node("id", "7", vec![]),
                node("title", "Selected Ambient Works", vec![]),
                node(
                    "genres",
                    "",
                    vec![node("genre", "Electronic", vec![])],
                ),
                node(
                    "styles",
                    "",
                    vec![node("style", "IDM", vec![])],
                ),
            ],
        );
        let parsed = parse_master(&master).expect("should parse");
        assert_eq!(parsed.genres, vec![("Electronic".to_string(), false), ("IDM".to_string(), true)]);
    }
}
