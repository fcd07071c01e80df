use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const TAG_MAP: &str = "map";
pub const TAG_CHARACTER: &str = "character";
pub const TAG_WEAPON: &str = "weapon";
pub const TAG_OTHER: &str = "other";

pub const PRIMARY_TAGS: &[&str] = &[TAG_MAP, TAG_CHARACTER, TAG_WEAPON, TAG_OTHER];

static FILENAME_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(_)?\[(.*?)\](.*)$").unwrap());

/// How a rule tests a lower-cased internal path or metadata text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Matcher {
    Contains(String),
    /// Whole-word match, so `scar` does not fire on `oscar`.
    Word(WordMatcher),
    Prefix(String),
    Path { prefix: String, suffix: String },
}

impl Matcher {
    pub fn matches(&self, haystack: &str) -> bool {
        match self {
            Matcher::Contains(needle) => haystack.contains(needle.as_str()),
            Matcher::Word(word) => word.is_match(haystack),
            Matcher::Prefix(prefix) => haystack.starts_with(prefix.as_str()),
            Matcher::Path { prefix, suffix } => {
                haystack.starts_with(prefix.as_str()) && haystack.ends_with(suffix.as_str())
            }
        }
    }
}

/// A literal word with its `\b` pattern, compiled when the rule is built or
/// deserialized. Serializes as the bare word.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WordMatcher {
    word: String,
    re: Regex,
}

impl WordMatcher {
    pub fn new(word: &str) -> Result<Self, regex::Error> {
        let re = Regex::new(&format!(r"\b{}\b", regex::escape(word)))?;
        Ok(Self {
            word: word.to_string(),
            re,
        })
    }

    pub fn word(&self) -> &str {
        &self.word
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.re.is_match(haystack)
    }
}

impl TryFrom<String> for WordMatcher {
    type Error = regex::Error;

    fn try_from(word: String) -> Result<Self, Self::Error> {
        Self::new(&word)
    }
}

impl From<WordMatcher> for String {
    fn from(matcher: WordMatcher) -> Self {
        matcher.word
    }
}

impl PartialEq for WordMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.word == other.word
    }
}

impl Eq for WordMatcher {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub matcher: Matcher,
    pub tag: String,
}

fn rule(matcher: Matcher, tag: &str) -> Rule {
    Rule {
        matcher,
        tag: tag.to_string(),
    }
}

fn contains(needle: &str, tag: &str) -> Rule {
    rule(Matcher::Contains(needle.to_string()), tag)
}

static SCAR_WORD: LazyLock<WordMatcher> = LazyLock::new(|| WordMatcher::new("scar").unwrap());

fn prefix(p: &str, tag: &str) -> Rule {
    rule(Matcher::Prefix(p.to_string()), tag)
}

fn path(p: &str, s: &str, tag: &str) -> Rule {
    rule(
        Matcher::Path {
            prefix: p.to_string(),
            suffix: s.to_string(),
        },
        tag,
    )
}

/// Ordered rule tables. Within a table the first matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierRules {
    pub primary: Vec<Rule>,
    pub character: Vec<Rule>,
    pub weapon_text: Vec<Rule>,
    pub weapon_paths: Vec<Rule>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            primary: vec![
                path("maps/", ".bsp", TAG_MAP),
                path("missions/", ".txt", TAG_MAP),
                prefix("models/survivors/", TAG_CHARACTER),
                prefix("materials/models/survivors/", TAG_CHARACTER),
                prefix("models/v_models/", TAG_WEAPON),
                prefix("models/w_models/", TAG_WEAPON),
                prefix("materials/models/weapons/", TAG_WEAPON),
                path("scripts/weapon_", ".txt", TAG_WEAPON),
                prefix("sound/weapons/", TAG_WEAPON),
            ],
            character: vec![
                contains("namvet", "Bill"),
                contains("teenangst", "Zoey"),
                contains("biker", "Francis"),
                contains("manager", "Louis"),
                contains("coach", "Coach"),
                contains("mechanic", "Ellis"),
                contains("gambler", "Nick"),
                contains("producer", "Rochelle"),
            ],
            weapon_text: vec![
                contains("ak47", "AK47"),
                contains("ak-47", "AK47"),
                contains("m16", "M16"),
                contains("sg552", "SG552"),
                rule(Matcher::Word(SCAR_WORD.clone()), "Combat Rifle"),
                contains("combat rifle", "Combat Rifle"),
                contains("combat-rifle", "Combat Rifle"),
                contains("desert rifle", "Combat Rifle"),
                contains("desert-rifle", "Combat Rifle"),
                contains("m60", "M60"),
                contains("uzi", "Uzi"),
                contains("silenced smg", "Silenced SMG"),
                contains("silenced-smg", "Silenced SMG"),
                contains("mac 10", "Silenced SMG"),
                contains("mac-10", "Silenced SMG"),
                contains("mac10", "Silenced SMG"),
                contains("mp5", "MP5"),
                contains("hunting rifle", "Hunting Rifle"),
                contains("hunting-rifle", "Hunting Rifle"),
                contains("mini14", "Hunting Rifle"),
                contains("military sniper", "Military Sniper"),
                contains("military-sniper", "Military Sniper"),
                contains("scout", "Scout"),
                contains("awp", "AWP"),
                contains("chrome", "Chrome Shotgun"),
                contains("pump shotgun", "Pump Shotgun"),
                contains("pump-shotgun", "Pump Shotgun"),
                contains("auto shotgun", "Auto Shotgun"),
                contains("auto-shotgun", "Auto Shotgun"),
                contains("autoshotgun", "Auto Shotgun"),
                contains("spas", "SPAS"),
                contains("magnum", "Magnum"),
                contains("desert eagle", "Magnum"),
                contains("desert-eagle", "Magnum"),
                contains("glock", "Pistol"),
                contains("p220", "Pistol"),
                contains("pistol", "Pistol"),
                contains("grenade launcher", "Grenade Launcher"),
                contains("grenade-launcher", "Grenade Launcher"),
                contains("machete", "Machete"),
                contains("katana", "Katana"),
                contains("baseball bat", "Baseball Bat"),
                contains("knife", "Knife"),
                contains("chainsaw", "Chainsaw"),
                contains("crowbar", "Crowbar"),
                contains("fireaxe", "Fire Axe"),
                contains("frying pan", "Frying Pan"),
                contains("guitar", "Guitar"),
                contains("cricket bat", "Cricket Bat"),
                contains("tonfa", "Nightstick"),
                contains("nightstick", "Nightstick"),
                contains("golf club", "Golf Club"),
                contains("shovel", "Shovel"),
                contains("pitchfork", "Pitchfork"),
            ],
            // Longer keys first: `desert_rifle` and `w_desert_eagle` both contain `desert`.
            weapon_paths: vec![
                contains("ak47", "AK47"),
                contains("desert_rifle", "Combat Rifle"),
                contains("w_desert_eagle", "Magnum"),
                contains("desert", "Combat Rifle"),
                contains("m16", "M16"),
                contains("sg552", "SG552"),
                contains("m60", "M60"),
                contains("awp", "AWP"),
                contains("sniper_military", "Military Sniper"),
                contains("sniper_a", "Military Sniper"),
                contains("hunting_rifle", "Hunting Rifle"),
                contains("w_sniper_mini14", "Hunting Rifle"),
                contains("sniper_scout", "Scout"),
                contains("chrome", "Chrome Shotgun"),
                contains("m1014", "Chrome Shotgun"),
                contains("autoshotgun", "Auto Shotgun"),
                contains("w_shotgun", "Pump Shotgun"),
                contains("spas", "SPAS"),
                contains("uzi", "Uzi"),
                contains("smg_silenced", "Silenced SMG"),
                contains("smg_a", "Silenced SMG"),
                contains("mp5", "MP5"),
                contains("magnum", "Magnum"),
                contains("pistol_glock", "Pistol"),
                contains("w_pistol_b", "Pistol"),
                contains("grenade_launcher", "Grenade Launcher"),
                contains("machete", "Machete"),
                contains("katana", "Katana"),
                contains("baseball_bat", "Baseball Bat"),
                contains("w_bat", "Baseball Bat"),
                contains("knife", "Knife"),
                contains("chainsaw", "Chainsaw"),
                contains("crowbar", "Crowbar"),
                contains("fireaxe", "Fire Axe"),
                contains("frying_pan", "Frying Pan"),
                contains("electric_guitar", "Guitar"),
                contains("w_guitar", "Guitar"),
                contains("cricket_bat", "Cricket Bat"),
                contains("tonfa", "Nightstick"),
                contains("golf_club", "Golf Club"),
                contains("shovel", "Shovel"),
                contains("pitchfork", "Pitchfork"),
            ],
        }
    }
}

const WEAPON_ASSET_EXTENSIONS: &[&str] = &[".mdl", ".vmt", ".vtf", ".wav", ".mp3"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub primary_tag: String,
    pub secondary_tags: Vec<String>,
}

fn first_match<'a>(rules: &'a [Rule], haystack: &str) -> Option<&'a str> {
    rules
        .iter()
        .find(|r| r.matcher.matches(haystack))
        .map(|r| r.tag.as_str())
}

impl ClassifierRules {
    pub fn primary_tag(&self, paths: &[String]) -> &str {
        self.primary
            .iter()
            .find(|r| paths.iter().any(|p| r.matcher.matches(p)))
            .map(|r| r.tag.as_str())
            .unwrap_or(TAG_OTHER)
    }

    /// `paths` must already be lower-cased with forward slashes.
    /// `metadata_text` is the addon title and description.
    pub fn classify(&self, paths: &[String], metadata_text: &str) -> Classification {
        let primary = self.primary_tag(paths).to_string();
        let mut secondary = BTreeSet::new();

        match primary.as_str() {
            TAG_MAP => {
                for p in paths {
                    if let Some(name) = mission_name(p) {
                        secondary.insert(name.to_string());
                    }
                }
            }
            TAG_CHARACTER => {
                for p in paths.iter().filter(|p| p.ends_with(".mdl") || p.ends_with(".vtf")) {
                    if let Some(tag) = first_match(&self.character, p) {
                        secondary.insert(tag.to_string());
                    }
                }
            }
            TAG_WEAPON => {
                if let Some(tag) = self.weapon_tag(paths, metadata_text) {
                    secondary.insert(tag.to_string());
                }
            }
            _ => {}
        }

        Classification {
            primary_tag: primary,
            secondary_tags: secondary.into_iter().collect(),
        }
    }

    fn weapon_tag(&self, paths: &[String], metadata_text: &str) -> Option<&str> {
        let text = metadata_text.trim().to_lowercase();
        if !text.is_empty() {
            if let Some(tag) = first_match(&self.weapon_text, &text) {
                return Some(tag);
            }
        }
        paths
            .iter()
            .filter(|p| WEAPON_ASSET_EXTENSIONS.iter().any(|ext| p.ends_with(ext)))
            .find_map(|p| first_match(&self.weapon_paths, p))
    }
}

fn mission_name(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("missions/")?;
    if rest.contains('/') {
        return None;
    }
    rest.strip_suffix(".txt").filter(|n| !n.is_empty())
}

/// Tags written into the file name as `[primary,secondary,...]name.vpk`,
/// optionally behind a leading `_`. An empty bracket yields an empty primary.
pub fn parse_filename_tags(filename: &str) -> Option<(String, Vec<String>)> {
    let caps = FILENAME_TAG_RE.captures(filename)?;
    let content = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let mut parts = content.split(',');
    let primary = parts.next().unwrap_or_default().trim().to_string();
    let secondary = parts
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    Some((primary, secondary))
}

/// A file name taken apart: hidden marker, written tags, and what follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedName {
    pub hidden: bool,
    pub tags: Option<(String, Vec<String>)>,
    pub base: String,
}

pub fn split_filename_tags(filename: &str) -> TaggedName {
    match FILENAME_TAG_RE.captures(filename) {
        Some(caps) => TaggedName {
            hidden: caps.get(1).is_some(),
            tags: parse_filename_tags(filename),
            base: caps.get(3).map(|m| m.as_str()).unwrap_or_default().to_string(),
        },
        None => match filename.strip_prefix('_') {
            Some(rest) => TaggedName {
                hidden: true,
                tags: None,
                base: rest.to_string(),
            },
            None => TaggedName {
                hidden: false,
                tags: None,
                base: filename.to_string(),
            },
        },
    }
}

/// Inverse of [`split_filename_tags`]. Blank tags are dropped; with no tags
/// left the bracket is omitted.
pub fn compose_filename(hidden: bool, primary: &str, secondary: &[String], base: &str) -> String {
    let tags: Vec<&str> = std::iter::once(primary)
        .chain(secondary.iter().map(String::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    let prefix = if hidden { "_" } else { "" };
    if tags.is_empty() {
        format!("{}{}", prefix, base)
    } else {
        format!("{}[{}]{}", prefix, tags.join(","), base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn map_with_missions() {
        let rules = ClassifierRules::default();
        let c = rules.classify(
            &paths(&[
                "maps/c1m1.bsp",
                "missions/deadcenter_remix.txt",
                "models/survivors/survivor_coach.mdl",
            ]),
            "",
        );
        assert_eq!(c.primary_tag, TAG_MAP);
        assert_eq!(c.secondary_tags, vec!["deadcenter_remix"]);
    }

    #[test]
    fn character_collects_every_survivor() {
        let rules = ClassifierRules::default();
        let c = rules.classify(
            &paths(&[
                "models/survivors/survivor_mechanic.mdl",
                "models/survivors/survivor_producer.mdl",
                "materials/models/survivors/mechanic/body.vtf",
            ]),
            "",
        );
        assert_eq!(c.primary_tag, TAG_CHARACTER);
        assert_eq!(c.secondary_tags, vec!["Ellis", "Rochelle"]);
    }

    #[test]
    fn weapon_prefers_metadata() {
        let rules = ClassifierRules::default();
        let files = paths(&["models/v_models/v_rifle_ak47.mdl"]);
        let c = rules.classify(&files, "Realistic SCAR-L replacement");
        assert_eq!(c.primary_tag, TAG_WEAPON);
        assert_eq!(c.secondary_tags, vec!["Combat Rifle"]);

        let c = rules.classify(&files, "Oscar's pack");
        assert_eq!(c.secondary_tags, vec!["AK47"]);
    }

    #[test]
    fn weapon_path_order_disambiguates() {
        let rules = ClassifierRules::default();
        let c = rules.classify(&paths(&["models/w_models/weapons/w_desert_eagle.mdl"]), "");
        assert_eq!(c.secondary_tags, vec!["Magnum"]);
    }

    #[test]
    fn anything_else_is_other() {
        let rules = ClassifierRules::default();
        let c = rules.classify(&paths(&["sound/music/menu.wav", "resource/ui/hud.res"]), "");
        assert_eq!(c.primary_tag, TAG_OTHER);
        assert!(c.secondary_tags.is_empty());
    }

    #[test]
    fn rules_round_trip_through_json() {
        let json = r#"{"primary":[{"matcher":{"kind":"prefix","value":"particles/"},"tag":"effects"}]}"#;
        let rules: ClassifierRules = serde_json::from_str(json).unwrap();
        assert_eq!(rules.primary.len(), 1);
        assert_eq!(rules.primary_tag(&paths(&["particles/fire.pcf"])), "effects");
        assert!(!rules.character.is_empty());
    }

    #[test]
    fn word_rules_load_from_json() {
        let json = r#"{"weapon_text":[{"matcher":{"kind":"word","value":"gun"},"tag":"Gun"}]}"#;
        let rules: ClassifierRules = serde_json::from_str(json).unwrap();
        assert!(!rules.weapon_text[0].matcher.matches("shotgun pack"));
        assert!(rules.weapon_text[0].matcher.matches("a gun pack"));

        let back = serde_json::to_value(&rules.weapon_text[0]).unwrap();
        assert_eq!(back["matcher"]["value"], "gun");
        match &rules.weapon_text[0].matcher {
            Matcher::Word(w) => assert_eq!(w.word(), "gun"),
            other => panic!("unexpected matcher {:?}", other),
        }
    }

    #[test]
    fn filename_tags() {
        assert_eq!(
            parse_filename_tags("[weapon, AK47 ,, M16]cool.vpk"),
            Some(("weapon".to_string(), vec!["AK47".to_string(), "M16".to_string()]))
        );
        assert_eq!(
            parse_filename_tags("_[map]hidden.vpk"),
            Some(("map".to_string(), vec![]))
        );
        assert_eq!(parse_filename_tags("[]x.vpk"), Some((String::new(), vec![])));
        assert_eq!(parse_filename_tags("plain.vpk"), None);
    }

    #[test]
    fn tagged_names_split_and_compose() {
        let parts = split_filename_tags("_[weapon,AK47]rifle.vpk");
        assert!(parts.hidden);
        assert_eq!(parts.base, "rifle.vpk");
        assert_eq!(
            parts.tags,
            Some(("weapon".to_string(), vec!["AK47".to_string()]))
        );

        let plain = split_filename_tags("_old.vpk");
        assert_eq!((plain.hidden, plain.tags, plain.base.as_str()), (true, None, "old.vpk"));

        assert_eq!(
            compose_filename(false, "map", &[" c1 ".into(), "".into()], "x.vpk"),
            "[map,c1]x.vpk"
        );
        assert_eq!(compose_filename(true, "", &[], "x.vpk"), "_x.vpk");
    }
}
