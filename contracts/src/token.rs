//! # Token Contract
//!
//! A native fungible-token contract in the style of `eosio.token`.
//!
//! ## Tables
//!
//! | table      | scope        | primary key | row              |
//! |------------|--------------|-------------|------------------|
//! | `stat`     | symbol code  | symbol code | [`CurrencyStats`] |
//! | `accounts` | owner        | symbol code | [`AccountBalance`] |
//!
//! Every `accounts` row also carries a `u64` secondary index on its balance
//! amount, so holders of a token can be walked in balance order.
//!
//! ## Actions
//!
//! - `create(issuer, maximum_supply)`: authorized by the contract account.
//! - `issue(to, quantity, memo)`: authorized by the issuer, `to` must be
//!   the issuer.
//! - `transfer(from, to, quantity, memo)`: authorized by `from`; notifies
//!   both parties.
//!
//! All supply and balance arithmetic is checked. An amount can never leave
//! `[-MAX_AMOUNT, MAX_AMOUNT]`.

use std::fmt;
use std::str::FromStr;

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use eos_ledger::chain::{CodecError, Name, Pack, Unpack};
use eos_ledger::controller::{ActionHandler, ApplyContext, ApplyError};
use eos_ledger::tables::{KeyValue, TableStore};

/// Largest absolute amount an asset may hold.
pub const MAX_AMOUNT: i64 = (1 << 62) - 1;

/// Longest memo accepted by `issue` and `transfer`, in bytes.
pub const MAX_MEMO_BYTES: usize = 256;

const STAT: Name = Name::new("stat");
const ACCOUNTS: Name = Name::new("accounts");

const CREATE: Name = Name::new("create");
const ISSUE: Name = Name::new("issue");
const TRANSFER: Name = Name::new("transfer");

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    #[error("token with symbol already exists")]
    AlreadyExists,

    #[error("token with symbol does not exist")]
    UnknownToken,

    #[error("symbol precision mismatch")]
    PrecisionMismatch,

    #[error("quantity must be positive")]
    NonPositiveQuantity,

    #[error("max-supply must be positive")]
    NonPositiveSupply,

    #[error("quantity exceeds available supply")]
    SupplyExceeded,

    #[error("tokens can only be issued to the issuer account")]
    IssueToOther,

    #[error("cannot transfer to self")]
    TransferToSelf,

    #[error("memo has more than 256 bytes")]
    MemoTooLong,

    #[error("no balance object found")]
    NoBalance,

    #[error("overdrawn balance")]
    Overdrawn,

    #[error("amount overflow")]
    Overflow,
}

impl From<TokenError> for ApplyError {
    fn from(e: TokenError) -> Self {
        ApplyError::Assert(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Symbol and Asset
// ---------------------------------------------------------------------------

/// Precision in the low byte, up to seven upper-case letters above it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub u64);

impl Symbol {
    pub fn new(precision: u8, code: &str) -> Result<Self, TokenError> {
        if code.is_empty() || code.len() > 7 || !code.bytes().all(|c| c.is_ascii_uppercase()) {
            return Err(TokenError::InvalidSymbol(code.to_string()));
        }
        if precision > 18 {
            return Err(TokenError::InvalidSymbol(format!("{precision},{code}")));
        }
        let raw = code
            .bytes()
            .rev()
            .fold(0u64, |acc, c| (acc << 8) | u64::from(c));
        Ok(Self((raw << 8) | u64::from(precision)))
    }

    pub fn precision(&self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// The code alone, as used for table scopes and primary keys.
    pub fn code(&self) -> u64 {
        self.0 >> 8
    }

    pub fn code_str(&self) -> String {
        self.code()
            .to_le_bytes()
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| char::from(c))
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        let code = self.code_str();
        !code.is_empty()
            && code.bytes().all(|c| c.is_ascii_uppercase())
            && self.code() >> (8 * code.len()) == 0
            && self.precision() <= 18
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.precision(), self.code_str())
    }
}

impl FromStr for Symbol {
    type Err = TokenError;

    /// `"4,EOS"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (precision, code) = s
            .split_once(',')
            .ok_or_else(|| TokenError::InvalidSymbol(s.to_string()))?;
        let precision = precision
            .parse()
            .map_err(|_| TokenError::InvalidSymbol(s.to_string()))?;
        Self::new(precision, code)
    }
}

impl Pack for Symbol {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.0.pack(out);
    }
}

impl Unpack for Symbol {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        u64::unpack(buf).map(Symbol)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub amount: i64,
    pub symbol: Symbol,
}

impl Asset {
    pub fn new(amount: i64, symbol: Symbol) -> Self {
        Self { amount, symbol }
    }

    pub fn is_valid(&self) -> bool {
        (-MAX_AMOUNT..=MAX_AMOUNT).contains(&self.amount) && self.symbol.is_valid()
    }

    pub fn checked_add(&self, other: &Asset) -> Result<Asset, TokenError> {
        if self.symbol != other.symbol {
            return Err(TokenError::PrecisionMismatch);
        }
        let amount = self
            .amount
            .checked_add(other.amount)
            .filter(|a| (-MAX_AMOUNT..=MAX_AMOUNT).contains(a))
            .ok_or(TokenError::Overflow)?;
        Ok(Asset::new(amount, self.symbol))
    }

    pub fn checked_sub(&self, other: &Asset) -> Result<Asset, TokenError> {
        let negated = other.amount.checked_neg().ok_or(TokenError::Overflow)?;
        self.checked_add(&Asset::new(negated, other.symbol))
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        let precision = usize::from(self.symbol.precision());
        let unit = match 10u64.checked_pow(precision as u32) {
            Some(unit) if precision > 0 => unit,
            _ => return write!(f, "{sign}{abs} {}", self.symbol.code_str()),
        };
        write!(
            f,
            "{sign}{}.{:0precision$} {}",
            abs / unit,
            abs % unit,
            self.symbol.code_str()
        )
    }
}

impl FromStr for Asset {
    type Err = TokenError;

    /// `"1.0000 EOS"`; the number of decimals sets the precision.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TokenError::InvalidAsset(s.to_string());
        let (number, code) = s.trim().split_once(' ').ok_or_else(invalid)?;
        let (negative, digits) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number),
        };
        let (int, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if int.is_empty() || !int.bytes().chain(frac.bytes()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let precision = u8::try_from(frac.len()).map_err(|_| invalid())?;
        let symbol = Symbol::new(precision, code)?;

        let amount = format!("{int}{frac}").parse::<i64>().map_err(|_| invalid())?;
        let amount = if negative { -amount } else { amount };
        let asset = Asset::new(amount, symbol);
        if !asset.is_valid() {
            return Err(invalid());
        }
        Ok(asset)
    }
}

impl Pack for Asset {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.amount.pack(out);
        self.symbol.pack(out);
    }
}

impl Unpack for Asset {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            amount: i64::unpack(buf)?,
            symbol: Symbol::unpack(buf)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Action payloads and rows
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Create {
    pub issuer: Name,
    pub maximum_supply: Asset,
}

impl Pack for Create {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.issuer.pack(out);
        self.maximum_supply.pack(out);
    }
}

impl Unpack for Create {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            issuer: Name::unpack(buf)?,
            maximum_supply: Asset::unpack(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub to: Name,
    pub quantity: Asset,
    pub memo: String,
}

impl Pack for Issue {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.to.pack(out);
        self.quantity.pack(out);
        self.memo.pack(out);
    }
}

impl Unpack for Issue {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            to: Name::unpack(buf)?,
            quantity: Asset::unpack(buf)?,
            memo: String::unpack(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: Name,
    pub to: Name,
    pub quantity: Asset,
    pub memo: String,
}

impl Pack for Transfer {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.from.pack(out);
        self.to.pack(out);
        self.quantity.pack(out);
        self.memo.pack(out);
    }
}

impl Unpack for Transfer {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            from: Name::unpack(buf)?,
            to: Name::unpack(buf)?,
            quantity: Asset::unpack(buf)?,
            memo: String::unpack(buf)?,
        })
    }
}

/// A `stat` row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyStats {
    pub supply: Asset,
    pub max_supply: Asset,
    pub issuer: Name,
}

impl Pack for CurrencyStats {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.supply.pack(out);
        self.max_supply.pack(out);
        self.issuer.pack(out);
    }
}

impl Unpack for CurrencyStats {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            supply: Asset::unpack(buf)?,
            max_supply: Asset::unpack(buf)?,
            issuer: Name::unpack(buf)?,
        })
    }
}

/// An `accounts` row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub balance: Asset,
}

impl Pack for AccountBalance {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.balance.pack(out);
    }
}

impl Unpack for AccountBalance {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Asset::unpack(buf).map(|balance| Self { balance })
    }
}

// ---------------------------------------------------------------------------
// Table access
// ---------------------------------------------------------------------------

fn find_row(
    tables: &TableStore<'_>,
    code: Name,
    scope: Name,
    table: Name,
    primary_key: u64,
) -> Result<Option<KeyValue>, ApplyError> {
    match tables.find_table(code, scope, table)? {
        Some(t) => Ok(tables.find(t.id, primary_key)?),
        None => Ok(None),
    }
}

fn decode<T: Unpack>(row: &KeyValue) -> Result<T, ApplyError> {
    Ok(T::unpack_exact(&row.value)?)
}

fn balance_key(balance: &Asset) -> Result<u64, ApplyError> {
    u64::try_from(balance.amount).map_err(|_| TokenError::Overflow.into())
}

/// `stat` row of the token `symbol` belongs to, checked for precision.
fn load_stats(
    tables: &TableStore<'_>,
    code: Name,
    symbol: Symbol,
) -> Result<(KeyValue, CurrencyStats), ApplyError> {
    let scope = Name::from(symbol.code());
    let row = find_row(tables, code, scope, STAT, symbol.code())?.ok_or(TokenError::UnknownToken)?;
    let stats: CurrencyStats = decode(&row)?;
    if stats.supply.symbol != symbol {
        return Err(TokenError::PrecisionMismatch.into());
    }
    Ok((row, stats))
}

fn sub_balance(tables: &mut TableStore<'_>, code: Name, owner: Name, value: &Asset) -> Result<(), ApplyError> {
    let row = find_row(tables, code, owner, ACCOUNTS, value.symbol.code())?
        .ok_or(TokenError::NoBalance)?;
    let current: AccountBalance = decode(&row)?;
    if current.balance.amount < value.amount {
        return Err(TokenError::Overdrawn.into());
    }
    let balance = current.balance.checked_sub(value)?;
    tables.update(row.id, None, &AccountBalance { balance }.packed())?;

    let mut index = tables.idx64();
    if let Some(secondary) = index.find_primary(row.t_id, row.primary_key)? {
        index.update(secondary.id, None, balance_key(&balance)?)?;
    }
    Ok(())
}

fn add_balance(
    tables: &mut TableStore<'_>,
    code: Name,
    owner: Name,
    value: &Asset,
    payer: Name,
) -> Result<(), ApplyError> {
    let pk = value.symbol.code();
    match find_row(tables, code, owner, ACCOUNTS, pk)? {
        Some(row) => {
            let current: AccountBalance = decode(&row)?;
            let balance = current.balance.checked_add(value)?;
            tables.update(row.id, None, &AccountBalance { balance }.packed())?;
            let mut index = tables.idx64();
            if let Some(secondary) = index.find_primary(row.t_id, pk)? {
                index.update(secondary.id, None, balance_key(&balance)?)?;
            }
        }
        None => {
            let row = AccountBalance { balance: *value };
            tables.store(code, owner, ACCOUNTS, payer, pk, &row.packed())?;
            tables
                .idx64()
                .store(code, owner, ACCOUNTS, payer, pk, balance_key(value)?)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// The token contract. Register it under the account that hosts it.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenContract;

impl TokenContract {
    fn create(ctx: &mut ApplyContext<'_>) -> Result<(), ApplyError> {
        let code = ctx.receiver();
        ctx.require_auth(code)?;
        let args: Create = ctx.data_as()?;

        let symbol = args.maximum_supply.symbol;
        if !symbol.is_valid() {
            return Err(TokenError::InvalidSymbol(symbol.to_string()).into());
        }
        if !args.maximum_supply.is_valid() {
            return Err(TokenError::InvalidAsset(args.maximum_supply.to_string()).into());
        }
        if args.maximum_supply.amount <= 0 {
            return Err(TokenError::NonPositiveSupply.into());
        }

        let scope = Name::from(symbol.code());
        let mut tables = ctx.tables()?;
        if find_row(&tables, code, scope, STAT, symbol.code())?.is_some() {
            return Err(TokenError::AlreadyExists.into());
        }
        let stats = CurrencyStats {
            supply: Asset::new(0, symbol),
            max_supply: args.maximum_supply,
            issuer: args.issuer,
        };
        tables.store(code, scope, STAT, code, symbol.code(), &stats.packed())?;
        Ok(())
    }

    fn issue(ctx: &mut ApplyContext<'_>) -> Result<(), ApplyError> {
        let code = ctx.receiver();
        let args: Issue = ctx.data_as()?;
        let quantity = args.quantity;
        if args.memo.len() > MAX_MEMO_BYTES {
            return Err(TokenError::MemoTooLong.into());
        }

        let (row, stats) = load_stats(&ctx.tables()?, code, quantity.symbol)?;
        ctx.require_auth(stats.issuer)?;
        if args.to != stats.issuer {
            return Err(TokenError::IssueToOther.into());
        }
        if !quantity.is_valid() {
            return Err(TokenError::InvalidAsset(quantity.to_string()).into());
        }
        if quantity.amount <= 0 {
            return Err(TokenError::NonPositiveQuantity.into());
        }
        if quantity.amount > stats.max_supply.amount - stats.supply.amount {
            return Err(TokenError::SupplyExceeded.into());
        }

        let mut tables = ctx.tables()?;
        let supply = stats.supply.checked_add(&quantity)?;
        tables.update(row.id, None, &CurrencyStats { supply, ..stats.clone() }.packed())?;
        add_balance(&mut tables, code, stats.issuer, &quantity, stats.issuer)
    }

    fn transfer(ctx: &mut ApplyContext<'_>) -> Result<(), ApplyError> {
        let code = ctx.receiver();
        let args: Transfer = ctx.data_as()?;
        if args.from == args.to {
            return Err(TokenError::TransferToSelf.into());
        }
        ctx.require_auth(args.from)?;
        if !ctx.is_account(args.to)? {
            return Err(ApplyError::UnknownAccount(args.to));
        }

        let quantity = args.quantity;
        load_stats(&ctx.tables()?, code, quantity.symbol)?;

        ctx.require_recipient(args.from)?;
        ctx.require_recipient(args.to)?;

        if !quantity.is_valid() {
            return Err(TokenError::InvalidAsset(quantity.to_string()).into());
        }
        if quantity.amount <= 0 {
            return Err(TokenError::NonPositiveQuantity.into());
        }
        if args.memo.len() > MAX_MEMO_BYTES {
            return Err(TokenError::MemoTooLong.into());
        }

        let payer = if ctx.has_auth(args.to) { args.to } else { args.from };
        let mut tables = ctx.tables()?;
        sub_balance(&mut tables, code, args.from, &quantity)?;
        add_balance(&mut tables, code, args.to, &quantity, payer)
    }
}

impl ActionHandler for TokenContract {
    fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<(), ApplyError> {
        // Notifications of other contracts' actions are not ours to handle.
        if ctx.action().account != ctx.receiver() {
            return Ok(());
        }
        match ctx.action().name {
            CREATE => Self::create(ctx),
            ISSUE => Self::issue(ctx),
            TRANSFER => Self::transfer(ctx),
            other => Err(ApplyError::Assert(format!("unknown action {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_layout() {
        let eos = Symbol::new(4, "EOS").unwrap();
        assert_eq!(eos.0, 0x53_4f_45_04);
        assert_eq!(eos.precision(), 4);
        assert_eq!(eos.code_str(), "EOS");
        assert_eq!(eos.to_string(), "4,EOS");
        assert_eq!("4,EOS".parse::<Symbol>().unwrap(), eos);
        assert!(eos.is_valid());
    }

    #[test]
    fn bad_symbols() {
        assert!(Symbol::new(4, "eos").is_err());
        assert!(Symbol::new(4, "TOOLONGX").is_err());
        assert!(Symbol::new(19, "EOS").is_err());
        assert!(!Symbol(0x04).is_valid());
    }

    #[test]
    fn asset_display_and_parse() {
        let eos = Symbol::new(4, "EOS").unwrap();
        assert_eq!(Asset::new(10_000, eos).to_string(), "1.0000 EOS");
        assert_eq!(Asset::new(-5, eos).to_string(), "-0.0005 EOS");
        assert_eq!(Asset::new(7, Symbol::new(0, "SYS").unwrap()).to_string(), "7 SYS");
        assert_eq!("1.0000 EOS".parse::<Asset>().unwrap(), Asset::new(10_000, eos));
        assert_eq!("-2.5000 EOS".parse::<Asset>().unwrap().amount, -25_000);
        assert!("1.0 eos".parse::<Asset>().is_err());
        assert!("abc EOS".parse::<Asset>().is_err());
    }

    #[test]
    fn arithmetic_is_checked() {
        let eos = Symbol::new(4, "EOS").unwrap();
        let max = Asset::new(MAX_AMOUNT, eos);
        assert_eq!(max.checked_add(&Asset::new(1, eos)), Err(TokenError::Overflow));
        assert_eq!(
            Asset::new(5, eos).checked_sub(&Asset::new(2, eos)).unwrap().amount,
            3
        );
        let other = Symbol::new(4, "SYS").unwrap();
        assert_eq!(
            Asset::new(5, eos).checked_add(&Asset::new(1, other)),
            Err(TokenError::PrecisionMismatch)
        );
    }

    #[test]
    fn transfer_payload_layout() {
        let t = Transfer {
            from: Name::new("alice"),
            to: Name::new("bob"),
            quantity: "1.0000 EOS".parse().unwrap(),
            memo: "hi".into(),
        };
        let bytes = t.packed();
        // two names, asset (i64 + u64), varuint length + 2 bytes
        assert_eq!(bytes.len(), 8 + 8 + 16 + 1 + 2);
        assert_eq!(Transfer::unpack_exact(&bytes).unwrap(), t);
    }
}
