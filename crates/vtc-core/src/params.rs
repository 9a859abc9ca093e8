#![forbid(unsafe_code)]

//! Interpreter for parameterized capability strings.
//!
//! Terminfo capability strings embed a small stack language: literal bytes
//! interspersed with `%` escapes that push parameters, do arithmetic, and
//! branch. This module evaluates that language directly over the format
//! bytes without any host string formatting.
//!
//! Supported escapes: `%%`, `%d`, `%c`, `%p1`..`%p9`, `%{n}`, `%'c'`,
//! `%+ %- %* %/ %m`, `%& %| %^`, `%= %< %> %A %O`, `%! %~`, `%i`,
//! `%? %t %e %;`, `%Pv`/`%gv` dynamic and static variables. Printf-style
//! width modifiers are not used by the motion and attribute capabilities
//! this crate consumes and are rejected.
//!
//! Historic tparm behavior is kept where entries depend on it: popping an
//! empty stack yields 0, and division by zero yields 0.

use crate::error::ParamError;

/// Expand `fmt` with up to nine numeric parameters.
pub fn expand(fmt: &str, params: &[i32]) -> Result<Vec<u8>, ParamError> {
    let mut out = Vec::with_capacity(fmt.len() + 8);
    expand_into(fmt, params, &mut out)?;
    Ok(out)
}

/// Expand `fmt` appending the result to `out`.
pub fn expand_into(fmt: &str, params: &[i32], out: &mut Vec<u8>) -> Result<(), ParamError> {
    let bytes = fmt.as_bytes();
    let mut p = [0i32; 9];
    for (slot, v) in p.iter_mut().zip(params) {
        *slot = *v;
    }

    let mut stack: Vec<i32> = Vec::with_capacity(4);
    // Terminfo distinguishes dynamic (a-z) and static (A-Z) variables;
    // both are scoped to one expansion here.
    let mut dynamic = [0i32; 26];
    let mut fixed = [0i32; 26];

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b != b'%' {
            out.push(b);
            i += 1;
            continue;
        }
        i += 1;
        let op = *bytes.get(i).ok_or(ParamError::Truncated)?;
        i += 1;
        match op {
            b'%' => out.push(b'%'),
            b'd' => push_decimal(out, pop(&mut stack)),
            b'c' => out.push(pop(&mut stack) as u8),
            b'p' => {
                let d = *bytes.get(i).ok_or(ParamError::Truncated)?;
                i += 1;
                if !(b'1'..=b'9').contains(&d) {
                    return Err(ParamError::UnknownEscape(d as char));
                }
                stack.push(p[(d - b'1') as usize]);
            }
            b'{' => {
                let mut v: i32 = 0;
                let mut negative = false;
                if bytes.get(i) == Some(&b'-') {
                    negative = true;
                    i += 1;
                }
                while let Some(&d) = bytes.get(i) {
                    if d == b'}' {
                        break;
                    }
                    if !d.is_ascii_digit() {
                        return Err(ParamError::UnknownEscape(d as char));
                    }
                    v = v.wrapping_mul(10).wrapping_add(i32::from(d - b'0'));
                    i += 1;
                }
                if bytes.get(i) != Some(&b'}') {
                    return Err(ParamError::Truncated);
                }
                i += 1;
                stack.push(if negative { -v } else { v });
            }
            b'\'' => {
                let c = *bytes.get(i).ok_or(ParamError::Truncated)?;
                i += 1;
                if bytes.get(i) != Some(&b'\'') {
                    return Err(ParamError::Truncated);
                }
                i += 1;
                stack.push(i32::from(c));
            }
            b'i' => {
                p[0] += 1;
                p[1] += 1;
            }
            b'+' | b'-' | b'*' | b'/' | b'm' | b'&' | b'|' | b'^' | b'=' | b'<' | b'>' | b'A'
            | b'O' => {
                let rhs = pop(&mut stack);
                let lhs = pop(&mut stack);
                stack.push(binary_op(op, lhs, rhs));
            }
            b'!' => {
                let v = pop(&mut stack);
                stack.push(i32::from(v == 0));
            }
            b'~' => {
                let v = pop(&mut stack);
                stack.push(!v);
            }
            b'P' => {
                let name = *bytes.get(i).ok_or(ParamError::Truncated)?;
                i += 1;
                let v = pop(&mut stack);
                match name {
                    b'a'..=b'z' => dynamic[(name - b'a') as usize] = v,
                    b'A'..=b'Z' => fixed[(name - b'A') as usize] = v,
                    _ => return Err(ParamError::UnknownEscape(name as char)),
                }
            }
            b'g' => {
                let name = *bytes.get(i).ok_or(ParamError::Truncated)?;
                i += 1;
                let v = match name {
                    b'a'..=b'z' => dynamic[(name - b'a') as usize],
                    b'A'..=b'Z' => fixed[(name - b'A') as usize],
                    _ => return Err(ParamError::UnknownEscape(name as char)),
                };
                stack.push(v);
            }
            b'?' | b';' => {
                // %? opens a conditional, %; closes one; neither emits.
            }
            b't' => {
                if pop(&mut stack) == 0 {
                    // Skip the then-branch: forward to the matching %e
                    // (resume there) or %; (resume past it).
                    i = skip_branch(bytes, i, true)?;
                }
            }
            b'e' => {
                // Reached only after a taken then-branch; skip the else.
                i = skip_branch(bytes, i, false)?;
            }
            other => return Err(ParamError::UnknownEscape(other as char)),
        }
    }
    Ok(())
}

fn pop(stack: &mut Vec<i32>) -> i32 {
    stack.pop().unwrap_or(0)
}

fn binary_op(op: u8, lhs: i32, rhs: i32) -> i32 {
    match op {
        b'+' => lhs.wrapping_add(rhs),
        b'-' => lhs.wrapping_sub(rhs),
        b'*' => lhs.wrapping_mul(rhs),
        b'/' => {
            if rhs == 0 {
                0
            } else {
                lhs.wrapping_div(rhs)
            }
        }
        b'm' => {
            if rhs == 0 {
                0
            } else {
                lhs.wrapping_rem(rhs)
            }
        }
        b'&' => lhs & rhs,
        b'|' => lhs | rhs,
        b'^' => lhs ^ rhs,
        b'=' => i32::from(lhs == rhs),
        b'<' => i32::from(lhs < rhs),
        b'>' => i32::from(lhs > rhs),
        b'A' => i32::from(lhs != 0 && rhs != 0),
        b'O' => i32::from(lhs != 0 || rhs != 0),
        _ => unreachable!("caller matched the operator set"),
    }
}

/// Skip from just after a `%t` (or `%e`) to the branch resume point.
///
/// Nested `%?`..`%;` groups are skipped whole. Literal bytes and
/// non-branch escapes are passed over without evaluation, which requires
/// stepping across `%'c'` and `%{n}` so a `;` inside them is not
/// mistaken for a close.
fn skip_branch(bytes: &[u8], mut i: usize, stop_at_else: bool) -> Result<usize, ParamError> {
    let mut depth = 0usize;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }
        i += 1;
        let op = *bytes.get(i).ok_or(ParamError::Truncated)?;
        i += 1;
        match op {
            b'?' => depth += 1,
            b';' => {
                if depth == 0 {
                    return Ok(i);
                }
                depth -= 1;
            }
            b'e' if depth == 0 && stop_at_else => return Ok(i),
            b'\'' => {
                // skip the quoted byte and closing quote
                i = i.checked_add(2).ok_or(ParamError::Truncated)?;
                if i > bytes.len() {
                    return Err(ParamError::Truncated);
                }
            }
            b'{' => {
                while i < bytes.len() && bytes[i] != b'}' {
                    i += 1;
                }
                i += 1;
            }
            _ => {}
        }
    }
    Err(ParamError::UnbalancedConditional)
}

fn push_decimal(out: &mut Vec<u8>, v: i32) {
    if v < 0 {
        out.push(b'-');
    }
    let mut n = v.unsigned_abs();
    let mut digits = [0u8; 10];
    let mut len = 0;
    loop {
        digits[len] = b'0' + (n % 10) as u8;
        n /= 10;
        len += 1;
        if n == 0 {
            break;
        }
    }
    while len > 0 {
        len -= 1;
        out.push(digits[len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_str(fmt: &str, params: &[i32]) -> String {
        String::from_utf8(expand(fmt, params).unwrap()).unwrap()
    }

    #[test]
    fn literal_passthrough() {
        assert_eq!(expand_str("plain", &[]), "plain");
        assert_eq!(expand_str("100%% done", &[]), "100% done");
    }

    #[test]
    fn cup_expansion_is_one_based() {
        // %i increments both parameters before emission.
        assert_eq!(expand_str("\x1b[%i%p1%d;%p2%dH", &[4, 9]), "\x1b[5;10H");
        assert_eq!(expand_str("\x1b[%i%p1%d;%p2%dH", &[0, 0]), "\x1b[1;1H");
    }

    #[test]
    fn parameterized_motion() {
        assert_eq!(expand_str("\x1b[%p1%dA", &[7]), "\x1b[7A");
        assert_eq!(expand_str("\x1b[%p1%dA", &[128]), "\x1b[128A");
    }

    #[test]
    fn arithmetic_and_constants() {
        assert_eq!(expand_str("%p1%{10}%+%d", &[5]), "15");
        assert_eq!(expand_str("%p1%{3}%-%d", &[5]), "2");
        assert_eq!(expand_str("%p1%{4}%*%d", &[5]), "20");
        assert_eq!(expand_str("%p1%{4}%/%d", &[22]), "5");
        assert_eq!(expand_str("%p1%{4}%m%d", &[22]), "2");
        // historic: division by zero yields 0
        assert_eq!(expand_str("%p1%{0}%/%d", &[22]), "0");
    }

    #[test]
    fn char_literal_and_percent_c() {
        assert_eq!(expand_str("%'A'%c", &[]), "A");
        // rxvt-style: emit parameter plus a character base
        assert_eq!(expand_str("%p1%'a'%+%c", &[1]), "b");
    }

    #[test]
    fn comparison_and_logic() {
        assert_eq!(expand_str("%p1%{8}%<%d", &[3]), "1");
        assert_eq!(expand_str("%p1%{8}%<%d", &[9]), "0");
        assert_eq!(expand_str("%p1%{8}%=%d", &[8]), "1");
        assert_eq!(expand_str("%p1%!%d", &[0]), "1");
        assert_eq!(expand_str("%p1%p2%A%d", &[1, 0]), "0");
        assert_eq!(expand_str("%p1%p2%O%d", &[1, 0]), "1");
    }

    #[test]
    fn setaf_conditional_both_branches() {
        let setaf = "\x1b[%?%p1%{8}%<%t3%p1%d%e38;5;%p1%d%;m";
        assert_eq!(expand_str(setaf, &[2]), "\x1b[32m");
        assert_eq!(expand_str(setaf, &[196]), "\x1b[38;5;196m");
    }

    #[test]
    fn nested_conditionals() {
        // 16-color setaf shape: <8 basic, <16 bright, else indexed.
        let fmt = "%?%p1%{8}%<%t3%p1%d%e%p1%{16}%<%t9%p1%{8}%-%d%e38;5;%p1%d%;%;";
        assert_eq!(expand_str(fmt, &[5]), "35");
        assert_eq!(expand_str(fmt, &[13]), "95");
        assert_eq!(expand_str(fmt, &[42]), "38;5;42");
    }

    #[test]
    fn variables_store_and_load() {
        assert_eq!(expand_str("%p1%Pa%ga%ga%+%d", &[21]), "42");
        assert_eq!(expand_str("%p1%PZ%gZ%d", &[7]), "7");
    }

    #[test]
    fn empty_stack_pops_zero() {
        assert_eq!(expand_str("%d", &[]), "0");
    }

    #[test]
    fn negative_constants_and_output() {
        assert_eq!(expand_str("%{-3}%d", &[]), "-3");
        assert_eq!(expand_str("%p1%{10}%-%d", &[4]), "-6");
    }

    #[test]
    fn unknown_escape_is_rejected() {
        assert_eq!(expand("%q", &[]), Err(ParamError::UnknownEscape('q')));
        assert_eq!(expand("%s", &[]), Err(ParamError::UnknownEscape('s')));
    }

    #[test]
    fn truncated_escape_is_rejected() {
        assert_eq!(expand("abc%", &[]), Err(ParamError::Truncated));
        assert_eq!(expand("%{12", &[]), Err(ParamError::Truncated));
        assert_eq!(expand("%'x", &[]), Err(ParamError::Truncated));
    }

    #[test]
    fn unbalanced_conditional_is_rejected() {
        assert_eq!(
            expand("%?%p1%t-then", &[0]),
            Err(ParamError::UnbalancedConditional)
        );
    }

    #[test]
    fn semicolon_inside_char_literal_not_a_terminator() {
        // The skipped branch contains %';' which must not close the group.
        let fmt = "%?%p1%t%';'%c%e!%;";
        assert_eq!(expand_str(fmt, &[1]), ";");
        assert_eq!(expand_str(fmt, &[0]), "!");
    }
}
