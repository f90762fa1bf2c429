//! Evaluation of constant expressions.

use std::collections::BTreeMap;
use std::ops::Range;

use pest::{
    iterators::Pair,
    pratt_parser::{Assoc, Op, PrattParser},
};

use super::{outline::Rule, PositionedError};

pub const RCFAST: i32 = 0x001;
pub const RCSLOW: i32 = 0x002;
pub const XINPUT: i32 = 0x004;
pub const XTAL1: i32 = 0x008;
pub const XTAL2: i32 = 0x010;
pub const XTAL3: i32 = 0x020;
pub const PLL1X: i32 = 0x040;
pub const PLL2X: i32 = 0x080;
pub const PLL4X: i32 = 0x100;
pub const PLL8X: i32 = 0x200;
pub const PLL16X: i32 = 0x400;

const BUILTINS: [(&str, Value); 16] = [
    ("TRUE", Value::Int(-1)),
    ("FALSE", Value::Int(0)),
    ("POSX", Value::Int(i32::MAX)),
    ("NEGX", Value::Int(i32::MIN)),
    ("PI", Value::Float(std::f32::consts::PI)),
    ("RCFAST", Value::Int(RCFAST)),
    ("RCSLOW", Value::Int(RCSLOW)),
    ("XINPUT", Value::Int(XINPUT)),
    ("XTAL1", Value::Int(XTAL1)),
    ("XTAL2", Value::Int(XTAL2)),
    ("XTAL3", Value::Int(XTAL3)),
    ("PLL1X", Value::Int(PLL1X)),
    ("PLL2X", Value::Int(PLL2X)),
    ("PLL4X", Value::Int(PLL4X)),
    ("PLL8X", Value::Int(PLL8X)),
    ("PLL16X", Value::Int(PLL16X)),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
}

impl Value {
    /// The 32-bit pattern stored for this value.
    pub fn bits(self) -> i32 {
        match self {
            Value::Int(v) => v,
            Value::Float(v) => v.to_bits() as i32,
        }
    }
}

fn span(p: &Pair<Rule>) -> Range<usize> {
    p.as_span().start()..p.as_span().end()
}

/// Constants of one object, keyed by upper-cased name.
pub struct Constants {
    pratt: PrattParser<Rule>,
    values: BTreeMap<String, Value>,
}

impl Default for Constants {
    fn default() -> Self {
        Self::new()
    }
}

impl Constants {
    pub fn new() -> Self {
        let pratt = PrattParser::new()
            .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
            .op(Op::infix(Rule::mul, Assoc::Left)
                | Op::infix(Rule::div, Assoc::Left)
                | Op::infix(Rule::modulo, Assoc::Left))
            .op(Op::infix(Rule::or, Assoc::Left) | Op::infix(Rule::xor, Assoc::Left))
            .op(Op::infix(Rule::and, Assoc::Left))
            .op(Op::infix(Rule::shl, Assoc::Left) | Op::infix(Rule::shr, Assoc::Left))
            .op(Op::prefix(Rule::neg) | Op::prefix(Rule::not));
        Self {
            pratt,
            values: BUILTINS
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
        }
    }

    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_ascii_uppercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(&name.to_ascii_uppercase()).copied()
    }

    pub fn eval(&self, p: Pair<Rule>) -> Result<Value, PositionedError> {
        assert_eq!(p.as_rule(), Rule::expr);
        self.pratt
            .map_primary(|primary| self.primary(primary))
            .map_prefix(|op, rhs| unary(&op, rhs?))
            .map_infix(|lhs, op, rhs| binary(lhs?, &op, rhs?))
            .parse(p.into_inner())
    }

    pub fn eval_int(&self, p: Pair<Rule>) -> Result<i32, PositionedError> {
        let at = span(&p);
        match self.eval(p)? {
            Value::Int(v) => Ok(v),
            Value::Float(_) => Err(PositionedError::new("Expected an integer constant", at)),
        }
    }

    /// A repeat count or array size.
    pub fn eval_count(&self, p: Pair<Rule>) -> Result<usize, PositionedError> {
        let at = span(&p);
        usize::try_from(self.eval_int(p)?)
            .map_err(|_| PositionedError::new("Count must be non-negative", at))
    }

    fn primary(&self, p: Pair<Rule>) -> Result<Value, PositionedError> {
        match p.as_rule() {
            Rule::number => number(p),
            Rule::float => {
                let text: String = p.as_str().chars().filter(|&c| c != '_').collect();
                text.parse()
                    .map(Value::Float)
                    .map_err(|_| PositionedError::new("Invalid floating-point constant", span(&p)))
            }
            Rule::ident => self
                .get(p.as_str())
                .ok_or_else(|| PositionedError::new("Undefined symbol", span(&p))),
            Rule::expr => self.eval(p),
            rule => panic!("invalid primary: {:?}", rule),
        }
    }
}

fn number(p: Pair<Rule>) -> Result<Value, PositionedError> {
    let at = span(&p);
    let digits = p.into_inner().next().unwrap();
    let text = digits.as_str();
    let (text, radix) = match digits.as_rule() {
        Rule::hex => (&text[1..], 16),
        Rule::quaternary => (&text[2..], 4),
        Rule::binary => (&text[1..], 2),
        Rule::decimal => (text, 10),
        rule => panic!("invalid number: {:?}", rule),
    };
    let text: String = text.chars().filter(|&c| c != '_').collect();
    u32::from_str_radix(&text, radix)
        .map(|v| Value::Int(v as i32))
        .map_err(|_| PositionedError::new("Constant exceeds 32 bits", at))
}

fn unary(op: &Pair<Rule>, rhs: Value) -> Result<Value, PositionedError> {
    match (op.as_rule(), rhs) {
        (Rule::neg, Value::Int(v)) => Ok(Value::Int(v.wrapping_neg())),
        (Rule::neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (Rule::not, Value::Int(v)) => Ok(Value::Int(!v)),
        (Rule::not, Value::Float(_)) => Err(PositionedError::new(
            "Operator is not allowed in floating-point constants",
            span(op),
        )),
        (rule, _) => panic!("invalid prefix: {:?}", rule),
    }
}

fn binary(lhs: Value, op: &Pair<Rule>, rhs: Value) -> Result<Value, PositionedError> {
    let at = || span(op);
    match (lhs, rhs) {
        (Value::Int(l), Value::Int(r)) => {
            let v = match op.as_rule() {
                Rule::add => l.wrapping_add(r),
                Rule::sub => l.wrapping_sub(r),
                Rule::mul => l.wrapping_mul(r),
                Rule::div | Rule::modulo if r == 0 => {
                    return Err(PositionedError::new("Divide by zero", at()))
                }
                Rule::div => l.wrapping_div(r),
                Rule::modulo => l.wrapping_rem(r),
                Rule::shl => l.wrapping_shl(r as u32),
                Rule::shr => (l as u32).wrapping_shr(r as u32) as i32,
                Rule::and => l & r,
                Rule::or => l | r,
                Rule::xor => l ^ r,
                rule => panic!("invalid infix: {:?}", rule),
            };
            Ok(Value::Int(v))
        }
        (Value::Float(l), Value::Float(r)) => {
            let v = match op.as_rule() {
                Rule::add => l + r,
                Rule::sub => l - r,
                Rule::mul => l * r,
                Rule::div if r == 0.0 => {
                    return Err(PositionedError::new("Divide by zero", at()))
                }
                Rule::div => l / r,
                _ => {
                    return Err(PositionedError::new(
                        "Operator is not allowed in floating-point constants",
                        at(),
                    ))
                }
            };
            Ok(Value::Float(v))
        }
        _ => Err(PositionedError::new(
            "Integer and floating-point values cannot be mixed",
            at(),
        )),
    }
}

/// Encodes a `_CLKMODE` value as the clock register byte, along with the
/// PLL multiplier applied to `_XINFREQ`. Returns `None` for combinations
/// the hardware cannot run.
pub fn clock_mode(mode: i32) -> Option<(u8, u32)> {
    let mode = mode as u32;
    let osc = mode & 0x3F;
    let pll = mode >> 6;
    if mode >> 11 != 0 || osc.count_ones() != 1 || pll.count_ones() > 1 {
        return None;
    }
    match osc as i32 {
        RCFAST if pll == 0 => Some((0x00, 0)),
        RCSLOW if pll == 0 => Some((0x01, 0)),
        RCFAST | RCSLOW => None,
        _ => {
            let oscm = (osc.trailing_zeros() - 2) as u8;
            let base = 0x20 | (oscm << 3);
            if pll == 0 {
                Some((base | 0x02, 1))
            } else {
                let k = pll.trailing_zeros();
                Some((base | 0x40 | (3 + k) as u8, 1 << k))
            }
        }
    }
}
