//! Optional symbol map and per-symbol execution counters.
//!
//! Symbols come from a text side channel the toolchain can emit next to an
//! image; nothing here ever affects execution. A missing or garbled map only
//! degrades diagnostics: addresses print as `base+0x…` and the profile
//! report has nothing to attribute counts to.

/// A sorted symbol map with per-symbol call counters.
pub struct SymbolTable {
    /// Sorted ascending by resolved address.
    symbols: Vec<Symbol>,
}

struct Symbol {
    address: u32,
    name: String,
    count: u64,
}

impl SymbolTable {
    /// A table with no symbols; every lookup degrades to `base+offset`.
    pub fn empty() -> SymbolTable {
        SymbolTable {
            symbols: Vec::new(),
        }
    }

    /// Parses a symbol map: one `<hex instruction index> <name>` pair per
    /// line, `#` comments and blank lines ignored.
    ///
    /// Indices are converted to resolved addresses through the instance's
    /// instruction-pointer table; lines that do not parse or point outside
    /// the module are skipped with a warning, never an error.
    pub fn parse(text: &str, instruction_pointers: &[u32]) -> SymbolTable {
        let mut symbols = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let parsed = parts
                .next()
                .and_then(|tok| u32::from_str_radix(tok, 16).ok())
                .zip(parts.next());
            let Some((index, name)) = parsed else {
                log::warn!("symbol map line {}: unparsable, skipped", lineno + 1);
                continue;
            };
            let Some(&address) = instruction_pointers.get(index as usize) else {
                log::warn!(
                    "symbol map line {}: instruction {index:#x} outside module, skipped",
                    lineno + 1
                );
                continue;
            };
            symbols.push(Symbol {
                address,
                name: name.to_owned(),
                count: 0,
            });
        }
        symbols.sort_by_key(|s| s.address);
        log::debug!("loaded {} symbols", symbols.len());
        SymbolTable { symbols }
    }

    /// Number of symbols loaded.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the map is absent or empty.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Human-readable form of a resolved address: `name+0x…` against the
    /// floor symbol, or `base+0x…` with no map.
    pub fn describe(&self, address: u32) -> String {
        match self.floor(address) {
            Some(i) => {
                let sym = &self.symbols[i];
                format!("{}+{:#x}", sym.name, address - sym.address)
            }
            None => format!("base+{address:#x}"),
        }
    }

    /// Credits one call to the floor symbol of `address`. Observation only.
    pub(crate) fn attribute(&mut self, address: u32) {
        if let Some(i) = self.floor(address) {
            self.symbols[i].count += 1;
        }
    }

    /// Renders the profile: counts descending with percent-of-total, then
    /// resets every counter.
    pub fn report(&mut self) -> String {
        let total: u64 = self.symbols.iter().map(|s| s.count).sum();
        if total == 0 {
            return String::from("no profile data\n");
        }
        let mut order: Vec<usize> = (0..self.symbols.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.symbols[i].count));

        let mut out = String::new();
        for i in order {
            let sym = &self.symbols[i];
            if sym.count == 0 {
                break;
            }
            out.push_str(&format!(
                "{:>10}  {:>5.1}%  {}\n",
                sym.count,
                sym.count as f64 * 100.0 / total as f64,
                sym.name
            ));
        }
        out.push_str(&format!("total: {total} calls\n"));
        for sym in &mut self.symbols {
            sym.count = 0;
        }
        out
    }

    /// Index of the last symbol at or below `address`.
    fn floor(&self, address: u32) -> Option<usize> {
        match self.symbols.binary_search_by_key(&address, |s| s.address) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        }
    }
}
