use super::models::Rendition;

/// Semantic quality labels and the rendition tag fragment each one selects.
///
/// `best` maps to an empty fragment, which every tag contains, so it picks the
/// first rendition the playlist lists (the highest quality on Twitch).
const QUALITY_MAPPINGS: &[(&str, &str)] = &[
    ("source", "chunked"),
    ("best", ""),
    ("audio", "audio_only"),
];

/// Tag fragment searched for when selecting `quality`.
pub fn quality_tag(quality: &str) -> &str {
    QUALITY_MAPPINGS
        .iter()
        .find(|(label, _)| *label == quality)
        .map(|(_, tag)| *tag)
        .unwrap_or(quality)
}

/// Semantic label of a rendition tag, or the tag itself when unmapped.
pub fn quality_label(tag: &str) -> &str {
    QUALITY_MAPPINGS
        .iter()
        .find(|(_, mapped)| *mapped == tag)
        .map(|(label, _)| *label)
        .unwrap_or(tag)
}

/// First rendition whose tag contains the fragment for `quality`.
pub fn select_rendition<'a>(renditions: &'a [Rendition], quality: &str) -> Option<&'a Rendition> {
    let tag = quality_tag(quality);
    renditions.iter().find(|r| r.tag.contains(tag))
}
