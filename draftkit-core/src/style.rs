//! 颜色、线型与样式。
//!
//! 三者构造后不可变，可被任意多个实体共享；`StyleTable` 按值去重，
//! 相等的值总是返回同一个 `Rc`。

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::errors::GeometryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Color {
    r: u8,
    g: u8,
    b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);

    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[inline]
    pub fn red(self) -> u8 {
        self.r
    }

    #[inline]
    pub fn green(self) -> u8 {
        self.g
    }

    #[inline]
    pub fn blue(self) -> u8 {
        self.b
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// 线型：名称加上划线/间隔交替的长度序列，空序列表示实线。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linetype {
    name: String,
    dashes: Vec<f64>,
}

impl Linetype {
    pub fn new(name: impl Into<String>, dashes: Vec<f64>) -> Result<Self, GeometryError> {
        if dashes.len() % 2 != 0 {
            return Err(GeometryError::InvalidDashes(format!(
                "expected an even number of entries, got {}",
                dashes.len()
            )));
        }
        if let Some(bad) = dashes.iter().find(|d| !d.is_finite() || **d <= 0.0) {
            return Err(GeometryError::InvalidDashes(format!(
                "dash length {bad} must be positive"
            )));
        }
        Ok(Self {
            name: name.into(),
            dashes,
        })
    }

    pub fn solid() -> Self {
        Self {
            name: "Solid".to_string(),
            dashes: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn dashes(&self) -> &[f64] {
        &self.dashes
    }

    #[inline]
    pub fn is_solid(&self) -> bool {
        self.dashes.is_empty()
    }
}

/// 实体的默认显示属性集合。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    name: String,
    linetype: Linetype,
    color: Color,
    thickness: f64,
}

impl Style {
    pub fn new(
        name: impl Into<String>,
        linetype: Linetype,
        color: Color,
        thickness: f64,
    ) -> Result<Self, GeometryError> {
        if !thickness.is_finite() || thickness < 0.0 {
            return Err(GeometryError::InvalidThickness(thickness));
        }
        Ok(Self {
            name: name.into(),
            linetype,
            color,
            thickness,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn linetype(&self) -> &Linetype {
        &self.linetype
    }

    #[inline]
    pub fn color(&self) -> Color {
        self.color
    }

    #[inline]
    pub fn thickness(&self) -> f64 {
        self.thickness
    }
}

impl Default for Style {
    fn default() -> Self {
        Self {
            name: "Default Style".to_string(),
            linetype: Linetype::solid(),
            color: Color::WHITE,
            thickness: 1.0,
        }
    }
}

/// 实体上的显示属性覆盖；未设置的字段回退到继承的默认样式。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    pub style: Option<Rc<Style>>,
    pub color: Option<Color>,
    pub linetype: Option<Rc<Linetype>>,
    pub thickness: Option<f64>,
}

impl Attributes {
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self.thickness {
            Some(t) if !t.is_finite() || t < 0.0 => Err(GeometryError::InvalidThickness(t)),
            _ => Ok(()),
        }
    }

    /// 实体自身样式优先，其次是继承的 `inherited`。
    pub fn effective_style<'a>(&'a self, inherited: &'a Style) -> &'a Style {
        self.style.as_deref().unwrap_or(inherited)
    }

    pub fn effective_color(&self, inherited: &Style) -> Color {
        self.color
            .unwrap_or_else(|| self.effective_style(inherited).color())
    }

    pub fn effective_linetype<'a>(&'a self, inherited: &'a Style) -> &'a Linetype {
        match &self.linetype {
            Some(linetype) => linetype,
            None => self.effective_style(inherited).linetype(),
        }
    }

    pub fn effective_thickness(&self, inherited: &Style) -> f64 {
        self.thickness
            .unwrap_or_else(|| self.effective_style(inherited).thickness())
    }
}

/// 按值去重的样式表，由图纸（Image）持有。
#[derive(Debug)]
pub struct StyleTable {
    colors: BTreeSet<Color>,
    linetypes: Vec<Rc<Linetype>>,
    styles: Vec<Rc<Style>>,
    default_style: Rc<Style>,
}

impl StyleTable {
    pub fn new(default_style: Style) -> Self {
        let mut table = Self {
            colors: BTreeSet::new(),
            linetypes: Vec::new(),
            styles: Vec::new(),
            default_style: Rc::new(Style::default()),
        };
        table.default_style = table.intern_style(default_style);
        table
    }

    #[inline]
    pub fn default_style(&self) -> Rc<Style> {
        Rc::clone(&self.default_style)
    }

    pub fn intern_color(&mut self, color: Color) -> Color {
        self.colors.insert(color);
        color
    }

    pub fn intern_linetype(&mut self, linetype: Linetype) -> Rc<Linetype> {
        if let Some(existing) = self.linetypes.iter().find(|lt| ***lt == linetype) {
            return Rc::clone(existing);
        }
        let shared = Rc::new(linetype);
        self.linetypes.push(Rc::clone(&shared));
        shared
    }

    pub fn intern_style(&mut self, style: Style) -> Rc<Style> {
        if let Some(existing) = self.styles.iter().find(|s| ***s == style) {
            return Rc::clone(existing);
        }
        self.intern_color(style.color());
        self.intern_linetype(style.linetype().clone());
        let shared = Rc::new(style);
        self.styles.push(Rc::clone(&shared));
        shared
    }

    pub fn colors(&self) -> impl Iterator<Item = Color> + '_ {
        self.colors.iter().copied()
    }

    pub fn linetypes(&self) -> impl Iterator<Item = &Rc<Linetype>> {
        self.linetypes.iter()
    }

    pub fn styles(&self) -> impl Iterator<Item = &Rc<Style>> {
        self.styles.iter()
    }
}

impl Default for StyleTable {
    fn default() -> Self {
        Self::new(Style::default())
    }
}
