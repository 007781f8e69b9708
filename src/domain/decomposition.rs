//! Currency decomposition reference data.
//!
//! Each instrument is split into a base leg (the asset bought or sold) and a quote
//! leg (the currency paid), and carries a route for converting its native price
//! into USD.

use crate::domain::{Decimal, Instrument};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// How the reference pair's price converts a quote-currency value into USD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Reference pair is quoted as QUOTE/USD: multiply.
    Direct,
    /// Reference pair is quoted as USD/QUOTE: divide.
    Inverted,
}

impl ConversionMode {
    pub fn from_inverted(inverted: bool) -> Self {
        if inverted {
            ConversionMode::Inverted
        } else {
            ConversionMode::Direct
        }
    }

    /// Convert `value` using a reference rate. `None` if the rate is not positive.
    pub fn apply(self, value: Decimal, rate: Decimal) -> Option<Decimal> {
        if !rate.is_positive() {
            return None;
        }
        match self {
            ConversionMode::Direct => Some(value * rate),
            ConversionMode::Inverted => value.checked_div(rate),
        }
    }
}

/// USD route for an instrument's native currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum UsdConversion {
    /// Native currency already is USD (or a USD stablecoin).
    Native,
    /// Convert through the quotes of a reference pair.
    Quoted {
        instrument: Instrument,
        mode: ConversionMode,
    },
    /// No one-hop USD pair exists; every USD conversion is a missing quote.
    Unresolved,
}

/// Decomposition of one instrument into base / quote / USD references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyDecomposition {
    pub instrument: Instrument,
    /// USD-quoted instrument pricing one unit of the base asset.
    pub base_instrument: Option<Instrument>,
    /// Instrument pricing the quote currency against USD.
    pub quote_instrument: Option<Instrument>,
    pub usd: UsdConversion,
}

impl CurrencyDecomposition {
    /// Decomposition for an instrument already denominated in USD.
    pub fn usd_native(instrument: Instrument) -> Self {
        Self {
            instrument,
            base_instrument: None,
            quote_instrument: None,
            usd: UsdConversion::Native,
        }
    }

    /// Build from a reference-table row. A null `usd_instrument` means USD-native.
    pub fn from_row(
        instrument: Instrument,
        base_instrument: Option<Instrument>,
        quote_instrument: Option<Instrument>,
        usd_instrument: Option<Instrument>,
        inverted: bool,
    ) -> Self {
        let usd = match usd_instrument {
            Some(instrument) => UsdConversion::Quoted {
                instrument,
                mode: ConversionMode::from_inverted(inverted),
            },
            None => UsdConversion::Native,
        };
        Self {
            instrument,
            base_instrument,
            quote_instrument,
            usd,
        }
    }

    pub fn usd_instrument(&self) -> Option<&Instrument> {
        match &self.usd {
            UsdConversion::Quoted { instrument, .. } => Some(instrument),
            _ => None,
        }
    }

    /// Conversion mode applied to every quote-currency conversion of this instrument.
    pub fn mode(&self) -> ConversionMode {
        match &self.usd {
            UsdConversion::Quoted { mode, .. } => *mode,
            _ => ConversionMode::Direct,
        }
    }
}

/// Lookup table from instrument to its decomposition.
///
/// Instruments absent from the table are treated as USD-native.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecompositionMap {
    entries: HashMap<Instrument, CurrencyDecomposition>,
}

/// Quote currencies that count as USD.
const USD_LIKE: [&str; 3] = ["USD", "USDT", "USDC"];

impl DecompositionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CurrencyDecomposition>) -> Self {
        let mut map = Self::new();
        for entry in entries {
            map.insert(entry);
        }
        map
    }

    /// Insert or replace an entry. Later duplicates win.
    pub fn insert(&mut self, entry: CurrencyDecomposition) {
        self.entries.insert(entry.instrument.clone(), entry);
    }

    pub fn resolve(&self, instrument: &Instrument) -> Cow<'_, CurrencyDecomposition> {
        match self.entries.get(instrument) {
            Some(entry) => Cow::Borrowed(entry),
            None => Cow::Owned(CurrencyDecomposition::usd_native(instrument.clone())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Derive decompositions from venue symbols shaped `Venue.Kind.BASE/QUOTE_SUFFIX`.
    ///
    /// Returns the map and the symbols whose USD route could not be resolved in one
    /// hop. Those are still inserted, as `UsdConversion::Unresolved`.
    pub fn from_symbols(symbols: &[Instrument]) -> (Self, Vec<Instrument>) {
        let pairs: BTreeMap<&Instrument, (String, String)> = symbols
            .iter()
            .filter_map(|s| parse_pair(s.as_str()).map(|p| (s, p)))
            .collect();

        // Best USD-quoted major per base asset, ranked by quote priority.
        let mut base_majors: HashMap<&str, (usize, &Instrument)> = HashMap::new();
        // Reference pair per currency: CCY/USD (direct) preferred over USD/CCY (inverted).
        let mut usd_pairs: HashMap<&str, (&Instrument, ConversionMode)> = HashMap::new();

        for (symbol, (base, quote)) in &pairs {
            if let Some(rank) = ["USDT", "USDC", "USD"].iter().position(|q| q == quote) {
                let better = base_majors
                    .get(base.as_str())
                    .map_or(true, |(existing, _)| rank < *existing);
                if better {
                    base_majors.insert(base.as_str(), (rank, *symbol));
                }
            }
            if quote == "USD" {
                usd_pairs.insert(base.as_str(), (*symbol, ConversionMode::Direct));
            } else if base == "USD" {
                usd_pairs
                    .entry(quote.as_str())
                    .or_insert((*symbol, ConversionMode::Inverted));
            }
        }

        let mut map = Self::new();
        let mut unresolved = Vec::new();
        for symbol in symbols {
            let Some((base, quote)) = pairs.get(symbol) else {
                unresolved.push(symbol.clone());
                map.insert(CurrencyDecomposition {
                    instrument: symbol.clone(),
                    base_instrument: None,
                    quote_instrument: None,
                    usd: UsdConversion::Unresolved,
                });
                continue;
            };

            let base_instrument = base_majors.get(base.as_str()).map(|(_, i)| (*i).clone());

            let entry = if USD_LIKE.contains(&quote.as_str()) {
                CurrencyDecomposition {
                    instrument: symbol.clone(),
                    base_instrument: Some(symbol.clone()),
                    quote_instrument: None,
                    usd: UsdConversion::Native,
                }
            } else if let Some((reference, mode)) = usd_pairs.get(quote.as_str()) {
                CurrencyDecomposition {
                    instrument: symbol.clone(),
                    base_instrument,
                    quote_instrument: Some((*reference).clone()),
                    usd: UsdConversion::Quoted {
                        instrument: (*reference).clone(),
                        mode: *mode,
                    },
                }
            } else {
                unresolved.push(symbol.clone());
                CurrencyDecomposition {
                    instrument: symbol.clone(),
                    base_instrument,
                    quote_instrument: None,
                    usd: UsdConversion::Unresolved,
                }
            };
            map.insert(entry);
        }

        (map, unresolved)
    }
}

/// Extract `(BASE, QUOTE)` from `Venue.Kind.BASE/QUOTE_SUFFIX` or plain `BASE/QUOTE`.
fn parse_pair(symbol: &str) -> Option<(String, String)> {
    let pair = symbol.rsplit('.').next()?;
    let pair = pair.split('_').next()?;
    let (base, quote) = pair.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base.to_ascii_uppercase(), quote.to_ascii_uppercase()))
}
