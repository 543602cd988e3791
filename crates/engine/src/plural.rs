/// Word forms for a counted noun: `[one, few, many]`, e.g. `["раз", "раза", "раз"]`.
pub type WordForms<'a> = [&'a str; 3];

pub fn plural_form(n: u64) -> usize {
    const BY_LAST_DIGIT: [usize; 6] = [2, 0, 1, 1, 1, 2];
    let tens = n % 100;
    if tens > 4 && tens < 20 {
        2
    } else {
        let last = (n % 10).min(5) as usize;
        BY_LAST_DIGIT[last]
    }
}

pub fn pluralize<'a>(n: u64, forms: &WordForms<'a>) -> &'a str {
    forms[plural_form(n)]
}
