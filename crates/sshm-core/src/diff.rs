// ABOUTME: Minimal line diff used to preview a flush without writing it.
// ABOUTME: LCS over lines, rendered as unified-style hunks with a little context.

const CONTEXT: usize = 2;

/// Larger changed regions are shown as a plain replacement instead of an LCS.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op<'a> {
    Keep(&'a str),
    Remove(&'a str),
    Add(&'a str),
}

/// Render the differences between `old` and `new`. Empty when they match.
pub fn line_diff(old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let ops = diff_ops(&old_lines, &new_lines);
    render(&ops)
}

fn diff_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Op<'a>> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut ops = Vec::with_capacity(old.len() + new.len());
    ops.extend(old[..prefix].iter().map(|&l| Op::Keep(l)));
    if (old_mid.len() + 1).saturating_mul(new_mid.len() + 1) > MAX_LCS_CELLS {
        ops.extend(old_mid.iter().map(|&l| Op::Remove(l)));
        ops.extend(new_mid.iter().map(|&l| Op::Add(l)));
    } else {
        lcs_ops(old_mid, new_mid, &mut ops);
    }
    ops.extend(old[old.len() - suffix..].iter().map(|&l| Op::Keep(l)));
    ops
}

fn lcs_ops<'a>(old: &[&'a str], new: &[&'a str], ops: &mut Vec<Op<'a>>) {
    let (n, m) = (old.len(), new.len());
    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op::Keep(old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(Op::Remove(old[i]));
            i += 1;
        } else {
            ops.push(Op::Add(new[j]));
            j += 1;
        }
    }
    ops.extend(old[i..].iter().map(|&l| Op::Remove(l)));
    ops.extend(new[j..].iter().map(|&l| Op::Add(l)));
}

fn render(ops: &[Op<'_>]) -> String {
    let changed: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, Op::Keep(_)))
        .map(|(idx, _)| idx)
        .collect();

    // Group changes whose context windows touch into hunks.
    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for &idx in &changed {
        let start = idx.saturating_sub(CONTEXT);
        let end = (idx + CONTEXT + 1).min(ops.len());
        match hunks.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => hunks.push((start, end)),
        }
    }

    let mut out = String::new();
    for (start, end) in hunks {
        let old_line = 1 + ops[..start].iter().filter(|op| !matches!(op, Op::Add(_))).count();
        let new_line = 1 + ops[..start].iter().filter(|op| !matches!(op, Op::Remove(_))).count();
        out.push_str(&format!("@@ -{old_line} +{new_line} @@\n"));
        for op in &ops[start..end] {
            let (sign, line) = match op {
                Op::Keep(l) => (' ', l),
                Op::Remove(l) => ('-', l),
                Op::Add(l) => ('+', l),
            };
            out.push(sign);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
