//! Identifier normalization shared by the query compiler and the descriptor
//! registry, so query labels and exposed metric names always agree.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Upper,
    Lower,
    Digit,
    Separator,
}

fn classify(ch: char) -> CharClass {
    if ch.is_numeric() {
        CharClass::Digit
    } else if ch.is_uppercase() {
        CharClass::Upper
    } else if ch.is_alphabetic() {
        CharClass::Lower
    } else {
        CharClass::Separator
    }
}

/// Splits `input` into words and joins them lowercased with `_`.
///
/// Word boundaries are placed at case changes (`CpuUtilization`), before the
/// last capital of an acronym that starts a new word (`PDFLoader`), where
/// letters follow digits (`99Bottles`) and at any character that is neither a
/// letter nor a digit, `/` included. Digits that follow letters stay in the
/// same word, so `EC2` becomes `ec2`. Input made only of separators yields an
/// empty string.
pub fn normalize(input: &str) -> String {
    let chars = input.chars().collect::<Vec<_>>();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut previous = CharClass::Separator;

    for (index, &ch) in chars.iter().enumerate() {
        let class = classify(ch);
        let boundary = match (previous, class) {
            (_, CharClass::Separator) => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
                previous = CharClass::Separator;
                continue;
            }
            (CharClass::Lower, CharClass::Upper) => true,
            (CharClass::Digit, CharClass::Upper | CharClass::Lower) => true,
            (CharClass::Upper, CharClass::Upper) => chars
                .get(index + 1)
                .is_some_and(|next| classify(*next) == CharClass::Lower),
            _ => false,
        };

        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.extend(ch.to_lowercase());
        previous = class;
    }

    if !current.is_empty() {
        words.push(current);
    }
    words.join("_")
}

/// Output metric name for a namespace, metric name and statistic triple:
/// each part normalized, empty parts dropped, joined with `_`.
pub fn metric_name(namespace: &str, metric_name: &str, statistic: &str) -> String {
    [namespace, metric_name, statistic]
        .into_iter()
        .map(normalize)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
