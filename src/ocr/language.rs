//! §4.E language code → `ScriptFamily` resolution. Case-insensitive lookup
//! over ISO 639-1/2/3 codes plus common English names; unsupported codes
//! resolve to `None` rather than a default family.

use common::ScriptFamily;

/// Resolves a BCP-47-ish language tag or English name to the script family
/// whose OCR models can read it. Only the primary subtag is considered, so
/// `"en-US"` and `"EN"` both resolve to `Latin`.
#[must_use]
pub fn family_for_language(code: &str) -> Option<ScriptFamily> {
    use ScriptFamily::*;
    let primary = code.split(['-', '_']).next().unwrap_or(code);
    let lower = primary.to_ascii_lowercase();
    Some(match lower.as_str() {
        "en" | "eng" | "english" | "es" | "spa" | "spanish" | "fr" | "fre" | "fra" | "french"
        | "de" | "ger" | "deu" | "german" | "it" | "ita" | "italian" | "pt" | "por"
        | "portuguese" | "nl" | "dut" | "nld" | "dutch" | "sv" | "swe" | "swedish" | "no"
        | "nor" | "norwegian" | "da" | "dan" | "danish" | "pl" | "pol" | "polish" | "tr"
        | "tur" | "turkish" | "id" | "ind" | "indonesian" | "vi" | "vie" | "vietnamese" => Latin,

        "zh" | "chi" | "zho" | "chinese" | "ja" | "jpn" | "japanese" => Cjk,

        "ko" | "kor" | "korean" => Korean,

        "ru" | "rus" | "russian" | "uk" | "ukr" | "ukrainian" | "bg" | "bul" | "bulgarian"
        | "sr" | "srp" | "serbian" | "be" | "bel" | "belarusian" => Cyrillic,

        "ar" | "ara" | "arabic" | "fa" | "per" | "fas" | "persian" | "ur" | "urd" | "urdu" => {
            Arabic
        }

        "hi" | "hin" | "hindi" | "mr" | "mar" | "marathi" | "ne" | "nep" | "nepali" => Devanagari,

        "th" | "tha" | "thai" => Thai,

        "ta" | "tam" | "tamil" => Tamil,

        "te" | "tel" | "telugu" => Telugu,

        _ => return None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("en", Some(ScriptFamily::Latin); "iso 639-1")]
    #[test_case("ENG", Some(ScriptFamily::Latin); "iso 639-2 uppercase")]
    #[test_case("English", Some(ScriptFamily::Latin); "english name")]
    #[test_case("en-US", Some(ScriptFamily::Latin); "bcp47 region subtag")]
    #[test_case("ja", Some(ScriptFamily::Cjk); "japanese")]
    #[test_case("kor", Some(ScriptFamily::Korean); "korean iso639-2")]
    #[test_case("ru", Some(ScriptFamily::Cyrillic); "russian")]
    #[test_case("ar", Some(ScriptFamily::Arabic); "arabic")]
    #[test_case("hi", Some(ScriptFamily::Devanagari); "hindi")]
    #[test_case("th", Some(ScriptFamily::Thai); "thai")]
    #[test_case("ta", Some(ScriptFamily::Tamil); "tamil")]
    #[test_case("te", Some(ScriptFamily::Telugu); "telugu")]
    #[test_case("xx", None; "unsupported")]
    fn test_family_for_language(code: &str, want: Option<ScriptFamily>) {
        assert_eq!(want, family_for_language(code));
    }
}
