// src/extractors/registry.rs
//! Load-once store of extraction patterns, keyed by field and company identity.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extractors::fields::Field;
use crate::utils::error::RegistryError;

/// Dollar amount with an optional magnitude suffix.
const MONEY: &str = r"(?P<value>[-−]?(?:US)?\$[ \t]*[-−]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?(?:[ \t]*(?:thousands?|millions?|billions?|trillions?|mn|bn|[KMBTkmbt])\b)?)";
const PCT: &str = r"(?P<value>[-−]?\d+(?:\.\d+)?[ \t]*(?:%|percent\b))";
const MONTHS: &str = r"(?:January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sept|Sep|Oct|Nov|Dec)\.?";
const REGION: &str = r"(?:the\s+)?(?:United\s+States|U\.S\.|Canada|Mexico|North\s+America|South\s+America|Latin\s+America|Europe|Asia(?:[\s\-]Pacific)?|Middle\s+East|Africa|EMEA|APAC)";

const STOPLIST: &[&str] = &[
    "a", "an", "and", "as", "at", "by", "ceo", "cfo", "class", "common", "corp", "for", "form",
    "fy", "global", "in", "inc", "is", "its", "listed", "llc", "ltd", "market", "nasdaq", "nyse",
    "of", "on", "our", "per", "sec", "select", "shares", "stock", "symbol", "the", "ticker",
    "trading", "under", "us", "usd",
];

/// Which company a run is about; selects the company-scoped patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyIdentity {
    BlueBird,
    DoubleVerify,
    Apple,
    Microsoft,
    Amazon,
    Unrecognized,
}

impl CompanyIdentity {
    pub const KNOWN: [CompanyIdentity; 5] = [
        CompanyIdentity::BlueBird,
        CompanyIdentity::DoubleVerify,
        CompanyIdentity::Apple,
        CompanyIdentity::Microsoft,
        CompanyIdentity::Amazon,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            CompanyIdentity::BlueBird => "Blue Bird",
            CompanyIdentity::DoubleVerify => "DoubleVerify",
            CompanyIdentity::Apple => "Apple",
            CompanyIdentity::Microsoft => "Microsoft",
            CompanyIdentity::Amazon => "Amazon",
            CompanyIdentity::Unrecognized => "Unrecognized",
        }
    }

    fn ticker(self) -> Option<&'static str> {
        match self {
            CompanyIdentity::BlueBird => Some("blbd"),
            CompanyIdentity::DoubleVerify => Some("dv"),
            CompanyIdentity::Apple => Some("aapl"),
            CompanyIdentity::Microsoft => Some("msft"),
            CompanyIdentity::Amazon => Some("amzn"),
            CompanyIdentity::Unrecognized => None,
        }
    }

    /// Name stems matched as prefixes of a normalized identifier.
    fn name_stems(self) -> &'static [&'static str] {
        match self {
            CompanyIdentity::BlueBird => &["bluebird"],
            CompanyIdentity::DoubleVerify => &["doubleverify"],
            CompanyIdentity::Apple => &["apple"],
            CompanyIdentity::Microsoft => &["microsoft"],
            CompanyIdentity::Amazon => &["amazon"],
            CompanyIdentity::Unrecognized => &[],
        }
    }

    /// Phrases whose presence in document text suggests this company.
    fn indicators(self) -> &'static [&'static str] {
        match self {
            CompanyIdentity::BlueBird => &["Blue Bird", "BLBD", "school bus"],
            CompanyIdentity::DoubleVerify => &["DoubleVerify", "NYSE: DV", "digital advertising"],
            CompanyIdentity::Apple => &["Apple Inc", "AAPL", "Cupertino"],
            CompanyIdentity::Microsoft => &["Microsoft Corporation", "MSFT", "Redmond"],
            CompanyIdentity::Amazon => &["Amazon.com", "AMZN", "AWS"],
            CompanyIdentity::Unrecognized => &[],
        }
    }

    /// Resolves a company identifier such as `BLBD`, `BlueBird` or `bluebird_files`.
    pub fn from_identifier(identifier: &str) -> CompanyIdentity {
        let normalized: String = identifier
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if normalized.is_empty() {
            return CompanyIdentity::Unrecognized;
        }
        Self::KNOWN
            .into_iter()
            .find(|id| {
                id.ticker() == Some(normalized.as_str())
                    || id.name_stems().iter().any(|stem| normalized.starts_with(stem))
            })
            .unwrap_or(CompanyIdentity::Unrecognized)
    }

    /// Picks the company whose indicators occur most often across `texts`.
    ///
    /// Needs at least two hits and a strict lead over the runner-up.
    pub fn detect<'a>(texts: impl IntoIterator<Item = &'a str>) -> CompanyIdentity {
        let mut counts = [0usize; 5];
        for text in texts {
            for (slot, id) in Self::KNOWN.iter().enumerate() {
                counts[slot] += id
                    .indicators()
                    .iter()
                    .map(|ind| text.matches(ind).count())
                    .sum::<usize>();
            }
        }
        let mut ranked: Vec<(usize, CompanyIdentity)> =
            counts.iter().copied().zip(Self::KNOWN).collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        match ranked.as_slice() {
            [(top, id), (second, _), ..] if *top >= 2 && top > second => *id,
            _ => CompanyIdentity::Unrecognized,
        }
    }

    /// Identifier first, document text as the fallback.
    pub fn resolve<'a>(identifier: &str, texts: impl IntoIterator<Item = &'a str>) -> CompanyIdentity {
        match Self::from_identifier(identifier) {
            CompanyIdentity::Unrecognized => Self::detect(texts),
            known => known,
        }
    }
}

/// Whether a pattern is anchored to labelled context or matches a bare value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specificity {
    Anchored,
    Bare,
}

#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub name: String,
    pub field: Field,
    pub regex: Regex,
    /// 0..=100; higher wins ties in consolidation.
    pub priority: u8,
    pub company_scope: Option<CompanyIdentity>,
    pub specificity: Specificity,
}

impl PatternEntry {
    pub fn new(
        name: impl Into<String>,
        field: Field,
        pattern: &str,
        priority: u8,
        specificity: Specificity,
        company_scope: Option<CompanyIdentity>,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if priority > 100 {
            return Err(RegistryError::InvalidPattern {
                name,
                reason: format!("priority {} exceeds 100", priority),
            });
        }
        let regex = Regex::new(pattern).map_err(|e| RegistryError::InvalidPattern {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        if !regex.capture_names().any(|n| n == Some("value")) {
            return Err(RegistryError::MissingValueGroup(name));
        }
        Ok(Self {
            name,
            field,
            regex,
            priority,
            company_scope,
            specificity,
        })
    }

    pub fn is_scoped(&self) -> bool {
        self.company_scope.is_some()
    }
}

/// One pattern in the on-disk JSON format.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub field: Field,
    pub pattern: String,
    pub priority: u8,
    #[serde(default)]
    pub company: Option<CompanyIdentity>,
    #[serde(default = "default_anchored")]
    pub anchored: bool,
}

fn default_anchored() -> bool {
    true
}

impl PatternSpec {
    fn into_entry(self, fallback_name: String) -> Result<PatternEntry, RegistryError> {
        let specificity = if self.anchored {
            Specificity::Anchored
        } else {
            Specificity::Bare
        };
        PatternEntry::new(
            self.name.unwrap_or(fallback_name),
            self.field,
            &self.pattern,
            self.priority,
            specificity,
            self.company,
        )
    }
}

/// Populated once at start-up and shared read-only by every extraction task.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    entries: Vec<PatternEntry>,
    stoplist: HashSet<String>,
}

impl PatternRegistry {
    /// Empty registry with the default ticker stoplist.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            stoplist: STOPLIST.iter().map(|w| w.to_string()).collect(),
        }
    }

    /// The built-in pattern set.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for entry in builtin_entries()? {
            registry.insert(entry);
        }
        tracing::debug!("Loaded {} built-in patterns", registry.len());
        Ok(registry)
    }

    /// Adds the patterns from a JSON array file; returns how many were added.
    pub fn extend_from_json(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| RegistryError::PatternFile(format!("{}: {}", path.display(), e)))?;
        let specs: Vec<PatternSpec> = serde_json::from_str(&raw)
            .map_err(|e| RegistryError::PatternFile(format!("{}: {}", path.display(), e)))?;

        // Compile everything before inserting anything
        let entries = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                let fallback = format!("{}_custom_{}", spec.field, i + 1);
                spec.into_entry(fallback)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let added = entries.len();
        for entry in entries {
            self.insert(entry);
        }
        tracing::info!("Loaded {} extra patterns from {}", added, path.display());
        Ok(added)
    }

    pub fn insert(&mut self, entry: PatternEntry) {
        self.entries.push(entry);
        // Stable: equal keys keep registration order
        self.entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.is_scoped().cmp(&a.is_scoped()))
        });
    }

    /// Applicable patterns for `field`, by descending priority with
    /// company-scoped entries ahead of unscoped ones at equal priority.
    pub fn lookup(&self, field: Field, identity: CompanyIdentity) -> Vec<&PatternEntry> {
        self.entries
            .iter()
            .filter(|e| e.field == field)
            .filter(|e| e.company_scope.map_or(true, |scope| scope == identity))
            .collect()
    }

    pub fn entries(&self) -> &[PatternEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_stoplisted(&self, word: &str) -> bool {
        self.stoplist.contains(&word.to_ascii_lowercase())
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn expand(template: &str) -> String {
    template
        .replace("{MONEY}", MONEY)
        .replace("{PCT}", PCT)
        .replace("{MONTHS}", MONTHS)
        .replace("{REGION}", REGION)
}

struct Builtin {
    name: String,
    field: Field,
    priority: u8,
    scope: Option<CompanyIdentity>,
    specificity: Specificity,
    pattern: String,
}

fn builtin(
    name: &str,
    field: Field,
    priority: u8,
    scope: Option<CompanyIdentity>,
    specificity: Specificity,
    template: &str,
) -> Builtin {
    Builtin {
        name: name.to_string(),
        field,
        priority,
        scope,
        specificity,
        pattern: expand(template),
    }
}

/// A labelled (`label of $X`) and a bare (`label $X`) pattern for a money field.
fn money(field: Field, label: &str) -> [Builtin; 2] {
    let anchored = format!(
        r"(?i)\b{}\s+(?:of|was|were|totaled|totalled|reached|amounted\s+to|(?:increased|decreased|grew|rose|fell)\s+(?:\S+\s+)?to)\s+(?:approximately\s+)?{{MONEY}}",
        label
    );
    let bare = format!(r"(?i)\b{}[ \t]*[:\-]?[ \t]*{{MONEY}}", label);
    [
        builtin(&format!("{}_labelled", field), field, 80, None, Specificity::Anchored, &anchored),
        builtin(&format!("{}_bare", field), field, 60, None, Specificity::Bare, &bare),
    ]
}

/// A labelled (`label of X%`) and a colon (`label: X%`) pattern for a ratio field.
fn ratio(field: Field, label: &str) -> [Builtin; 2] {
    let anchored = format!(
        r"(?i)\b{}\s+(?:of|was|were|is|at|reached)\s+(?:approximately\s+)?{{PCT}}",
        label
    );
    let colon = format!(r"(?i)\b{}[ \t]*[:\-][ \t]*{{PCT}}", label);
    [
        builtin(&format!("{}_labelled", field), field, 80, None, Specificity::Anchored, &anchored),
        builtin(&format!("{}_colon", field), field, 75, None, Specificity::Anchored, &colon),
    ]
}

fn builtin_entries() -> Result<Vec<PatternEntry>, RegistryError> {
    use CompanyIdentity::*;
    use Field::*;
    use Specificity::*;

    let mut specs = vec![
        // --- company_name ---
        builtin("blue_bird_name", CompanyName, 95, Some(BlueBird), Anchored, r"(?P<value>Blue\s+Bird\s+Corporation)"),
        builtin("doubleverify_name", CompanyName, 95, Some(DoubleVerify), Anchored, r"(?P<value>DoubleVerify\s+Holdings,?\s+Inc\.?)"),
        builtin("apple_name", CompanyName, 95, Some(Apple), Anchored, r"(?P<value>Apple\s+Inc\.?)"),
        builtin("microsoft_name", CompanyName, 95, Some(Microsoft), Anchored, r"(?P<value>Microsoft\s+Corporation)"),
        builtin("amazon_name", CompanyName, 95, Some(Amazon), Anchored, r"(?P<value>Amazon\.com,?\s+Inc\.?)"),
        builtin(
            "legal_entity_name",
            CompanyName,
            55,
            None,
            Bare,
            r"\b(?P<value>(?:[A-Z][A-Za-z&\-]*[ \t]+){0,4}[A-Z][A-Za-z&\-]*[ \t]+(?:Corporation|Incorporated|Holdings,?[ \t]+Inc\.?|Inc\.|Corp\.|plc|N\.V\.))",
        ),
        // --- company_address ---
        builtin(
            "blue_bird_hq",
            CompanyAddress,
            95,
            Some(BlueBird),
            Anchored,
            r"(?i)\b(?:headquartered|headquarters|located|based)\b[^.;\n]{0,40}?(?P<value>Macon,\s*Georgia)",
        ),
        builtin("blue_bird_city", CompanyAddress, 90, Some(BlueBird), Bare, r"(?i)(?P<value>Macon,\s*Georgia)"),
        builtin(
            "doubleverify_hq",
            CompanyAddress,
            95,
            Some(DoubleVerify),
            Anchored,
            r"(?i)\b(?:headquartered|headquarters|located|based)\b[^.;\n]{0,40}?(?P<value>New\s+York,\s*(?:NY|New\s+York))",
        ),
        builtin(
            "doubleverify_city",
            CompanyAddress,
            90,
            Some(DoubleVerify),
            Bare,
            r"(?i)(?P<value>New\s+York,\s*(?:NY|New\s+York))",
        ),
        builtin(
            "headquarters_locality",
            CompanyAddress,
            75,
            None,
            Anchored,
            r"(?i:headquartered|headquarters\s+(?:are|is)\s+located|located|based)[ \t]+in[ \t]+(?P<value>[A-Z][a-z]+(?:[ \t][A-Z][a-z]+)*,[ \t]*[A-Z][A-Za-z]+(?:[ \t][A-Z][a-z]+)?)",
        ),
        builtin(
            "address_label",
            CompanyAddress,
            70,
            None,
            Anchored,
            r"(?i:address|location)[ \t]*:[ \t]*(?P<value>[^\n;]{5,100})",
        ),
        // --- stock_symbol ---
        builtin(
            "blue_bird_ticker",
            StockSymbol,
            95,
            Some(BlueBird),
            Anchored,
            r"(?i:nasdaq|symbol|ticker)[^A-Za-z0-9\n]{0,12}(?P<value>BLBD)\b",
        ),
        builtin(
            "doubleverify_ticker",
            StockSymbol,
            95,
            Some(DoubleVerify),
            Anchored,
            r"(?i:nyse|symbol|ticker)[^A-Za-z0-9\n]{0,12}(?P<value>DV)\b",
        ),
        builtin(
            "under_the_symbol",
            StockSymbol,
            85,
            None,
            Anchored,
            r#"(?i:under\s+the\s+(?:ticker\s+|trading\s+)?symbol)[ \t]*["“']?(?P<value>[A-Z]{1,5})\b"#,
        ),
        builtin(
            "symbol_label",
            StockSymbol,
            80,
            None,
            Anchored,
            r#"(?i:(?:trading|ticker|stock)\s+symbol)[ \t]*[:\-]?[ \t]*["“']?(?P<value>[A-Z]{1,5})\b"#,
        ),
        builtin(
            "exchange_parenthetical",
            StockSymbol,
            75,
            None,
            Anchored,
            r"\((?i:nasdaq|nyse)(?:[ \t]*[A-Za-z]*)?[ \t]*:[ \t]*(?P<value>[A-Z]{1,5})\)",
        ),
        builtin(
            "exchange_bare",
            StockSymbol,
            50,
            None,
            Bare,
            r"(?i)\b(?:NYSE|NASDAQ)(?:[ \t]+Global[ \t]+Select[ \t]+Market)?[ \t]*[:\-]?[ \t]*(?P<value>[A-Z]{1,5})\b",
        ),
        // --- fiscal_year ---
        builtin(
            "blue_bird_fiscal_year_end",
            FiscalYear,
            95,
            Some(BlueBird),
            Anchored,
            r"(?i)\b(?:fiscal\s+)?year\s+end(?:ed|ing)\s+(?P<value>September\s+30,?\s+\d{4})",
        ),
        builtin(
            "doubleverify_fiscal_year_end",
            FiscalYear,
            95,
            Some(DoubleVerify),
            Anchored,
            r"(?i)\b(?:fiscal\s+)?year\s+end(?:ed|ing)\s+(?P<value>December\s+31,?\s+\d{4})",
        ),
        builtin(
            "for_the_year_ended",
            FiscalYear,
            80,
            None,
            Anchored,
            r"(?i)\bfor\s+the\s+(?:fiscal\s+)?year\s+ended\s+(?P<value>{MONTHS}\s+\d{1,2},?\s+\d{4})",
        ),
        builtin(
            "year_ended_date",
            FiscalYear,
            75,
            None,
            Anchored,
            r"(?i)\b(?:fiscal\s+)?year\s+end(?:ed|ing)\s+(?P<value>{MONTHS}\s+\d{1,2},?\s+\d{4})",
        ),
        builtin(
            "year_ended_month",
            FiscalYear,
            55,
            None,
            Anchored,
            r"(?i)\bfiscal\s+year\s+end(?:ed|ing)\s+(?P<value>{MONTHS}\s+\d{4})\b",
        ),
        builtin(
            "fiscal_year_bare",
            FiscalYear,
            40,
            None,
            Bare,
            r"(?i)\bfiscal\s+(?:year\s+)?(?P<value>(?:19|20)\d{2})\b",
        ),
        // --- primary_business ---
        builtin(
            "blue_bird_business",
            PrimaryBusiness,
            90,
            Some(BlueBird),
            Anchored,
            r"(?i)\b(?:is|as)\s+(?:a|an|the)\s+(?P<value>[^.;\n]*?school\s+bus(?:es)?[^.;\n]*)",
        ),
        builtin(
            "doubleverify_business",
            PrimaryBusiness,
            90,
            Some(DoubleVerify),
            Anchored,
            r"(?i)\b(?:is|as)\s+(?:a|an|the)\s+(?P<value>[^.;\n]*?(?:digital\s+(?:advertising|media)|measurement|verification)[^.;\n]*)",
        ),
        builtin(
            "company_is_a",
            PrimaryBusiness,
            60,
            None,
            Anchored,
            r"(?i)\b(?:we|company)\s+(?:is|are)\s+(?:a|an|the)\s+(?P<value>[^.;\n]{10,200})",
        ),
        builtin(
            "business_verb",
            PrimaryBusiness,
            50,
            None,
            Bare,
            r"(?i)\b(?:provides|offers|develops|manufactures|designs)\s+(?P<value>[^.;\n]{10,200})",
        ),
        // --- geographic_markets ---
        builtin(
            "geographic_markets_label",
            GeographicMarkets,
            80,
            None,
            Anchored,
            r"(?i)\bgeographic\s+markets\s+(?:include|including|are|consist\s+of)\s+(?P<value>[^.;\n]+)",
        ),
        builtin(
            "sales_regions",
            GeographicMarkets,
            70,
            None,
            Anchored,
            r"(?i)\b(?:sell|sells|sold|market|markets|distribute|distributes)\b[^.;\n]{0,40}?\b(?:in|to|throughout)\s+(?P<value>{REGION}(?:(?:\s*,\s*(?:and\s+)?|\s+and\s+){REGION})*)",
        ),
        builtin(
            "presence_regions",
            GeographicMarkets,
            45,
            None,
            Bare,
            r"(?i)\b(?:operations|customers|presence)\s+in\s+(?P<value>{REGION}(?:(?:\s*,\s*(?:and\s+)?|\s+and\s+){REGION})*)",
        ),
        // --- supplementary text fields ---
        builtin(
            "industry_label",
            Industry,
            70,
            None,
            Anchored,
            r"(?i)\bindustry[ \t]*[:\-][ \t]*(?P<value>[^.;\n]{3,80})",
        ),
        builtin(
            "operate_in_industry",
            Industry,
            65,
            None,
            Anchored,
            r"(?i)\boperates?\s+in\s+the\s+(?P<value>[^.;\n]{3,60}?)\s+industry\b",
        ),
        builtin(
            "products_include",
            KeyProducts,
            75,
            None,
            Anchored,
            r"(?i)\b(?:key\s+|principal\s+|primary\s+)?products\s+include\s+(?P<value>[^.;\n]+)",
        ),
        builtin(
            "employee_count",
            Employees,
            75,
            None,
            Anchored,
            r"(?i)\b(?:had|employ|employed|have)\s+(?:approximately\s+|about\s+)?(?P<value>\d{1,3}(?:,\d{3})+|\d+)\s+(?:full[\s\-]time\s+)?(?:employees|people)\b",
        ),
        builtin(
            "employee_count_bare",
            Employees,
            50,
            None,
            Bare,
            r"(?i)\b(?P<value>\d{1,3}(?:,\d{3})+|\d+)\s+employees\b",
        ),
    ];

    // --- money fields ---
    specs.extend(money(Revenue, r"(?:total\s+)?(?:net\s+)?(?:revenues?|sales)"));
    specs.extend(money(NetIncome, r"net\s+(?:income|earnings)"));
    specs.extend(money(TotalAssets, r"total\s+assets"));
    specs.extend(money(TotalLiabilities, r"total\s+liabilities"));
    specs.extend(money(MarketCap, r"market\s+(?:capitalization|cap|value)"));
    specs.extend(money(ShareholdersEquity, r"total\s+(?:stockholders|shareholders)['’]?\s+(?:equity|deficit)"));
    specs.extend(money(
        OperatingCashFlow,
        r"(?:(?:net\s+)?cash\s+(?:provided\s+by|from|generated\s+(?:by|from))\s+operating\s+activities|operating\s+cash\s+flows?)",
    ));
    specs.extend(money(Eps, r"(?:diluted\s+)?(?:(?:earnings|net\s+income)\s+per\s+(?:diluted\s+)?share|EPS)"));

    // --- ratio fields ---
    specs.extend(ratio(NetMargin, r"net\s+(?:profit\s+)?margin"));
    specs.extend(ratio(OperatingMargin, r"operating\s+(?:profit\s+)?margin"));
    specs.extend(ratio(GrossMargin, r"gross\s+(?:profit\s+)?margin"));

    specs
        .into_iter()
        .map(|b| PatternEntry::new(b.name, b.field, &b.pattern, b.priority, b.specificity, b.scope))
        .collect()
}
