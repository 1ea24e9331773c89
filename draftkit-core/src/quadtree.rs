//! 通用四叉树空间索引。
//!
//! 每个条目以其轴对齐包围盒登记，跨越分割线的条目会同时存放在所有相交的子节点中。
//! 构造线的包围盒在无限轴上为 `±INFINITY`，它们与该轴上的每个节点都相交，
//! 但不会让根节点在无限方向上扩张。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::hash::Hash;

use crate::geometry::{EPSILON, Bounds2D, Point2};

/// 分裂/合并阈值。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadtreeLimits {
    /// 叶子超过该数量时分裂。
    pub max_occupancy: usize,
    /// 四个子叶子合计的不同条目少于该数量时合并。
    pub min_occupancy: usize,
    pub max_depth: usize,
    /// 根节点扩张时按范围的比例留出余量，至少 1.0。
    pub growth_margin: f64,
}

impl Default for QuadtreeLimits {
    fn default() -> Self {
        Self {
            max_occupancy: 8,
            min_occupancy: 4,
            max_depth: 16,
            growth_margin: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quadrant {
    NorthEast,
    NorthWest,
    SouthWest,
    SouthEast,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::NorthEast,
        Quadrant::NorthWest,
        Quadrant::SouthWest,
        Quadrant::SouthEast,
    ];

    /// 父节点边界中该象限对应的子边界。
    pub fn bounds_within(self, parent: &Bounds2D) -> Bounds2D {
        let c = parent.center();
        match self {
            Quadrant::NorthEast => Bounds2D::from_coords(c.x(), c.y(), parent.xmax(), parent.ymax()),
            Quadrant::NorthWest => Bounds2D::from_coords(parent.xmin(), c.y(), c.x(), parent.ymax()),
            Quadrant::SouthWest => Bounds2D::from_coords(parent.xmin(), parent.ymin(), c.x(), c.y()),
            Quadrant::SouthEast => Bounds2D::from_coords(c.x(), parent.ymin(), parent.xmax(), c.y()),
        }
    }
}

#[derive(Debug)]
struct Node<T> {
    boundary: Bounds2D,
    depth: usize,
    content: Content<T>,
}

#[derive(Debug)]
enum Content<T> {
    Leaf(Vec<T>),
    /// 顺序与 `Quadrant::ALL` 一致。
    Branch(Box<[Node<T>; 4]>),
}

impl<T: Copy + Eq + Hash> Node<T> {
    fn leaf(boundary: Bounds2D, depth: usize) -> Self {
        Self {
            boundary,
            depth,
            content: Content::Leaf(Vec::new()),
        }
    }

    fn insert(
        &mut self,
        item: T,
        bounds: &Bounds2D,
        entries: &HashMap<T, Bounds2D>,
        limits: &QuadtreeLimits,
    ) {
        if !self.boundary.intersects(bounds) {
            return;
        }
        match &mut self.content {
            Content::Leaf(items) => {
                items.push(item);
                if items.len() > limits.max_occupancy && self.depth < limits.max_depth {
                    self.split(entries, limits);
                }
            }
            Content::Branch(children) => {
                for child in children.iter_mut() {
                    child.insert(item, bounds, entries, limits);
                }
            }
        }
    }

    fn split(&mut self, entries: &HashMap<T, Bounds2D>, limits: &QuadtreeLimits) {
        let quadrants = Quadrant::ALL.map(|q| q.bounds_within(&self.boundary));
        let Content::Leaf(items) = &mut self.content else {
            return;
        };
        // 所有条目都覆盖全部四个象限时，分裂只会复制条目，拒绝之。
        let pointless = items.iter().all(|item| {
            entries
                .get(item)
                .is_none_or(|b| quadrants.iter().all(|q| q.intersects(b)))
        });
        if pointless {
            return;
        }

        let items = std::mem::take(items);
        let depth = self.depth + 1;
        let mut children = Box::new(quadrants.map(|boundary| Node::leaf(boundary, depth)));
        for item in items {
            if let Some(bounds) = entries.get(&item) {
                for child in children.iter_mut() {
                    child.insert(item, bounds, entries, limits);
                }
            }
        }
        self.content = Content::Branch(children);
    }

    fn remove(&mut self, item: &T, bounds: &Bounds2D) {
        if !self.boundary.intersects(bounds) {
            return;
        }
        match &mut self.content {
            Content::Leaf(items) => items.retain(|candidate| candidate != item),
            Content::Branch(children) => {
                for child in children.iter_mut() {
                    child.remove(item, bounds);
                }
            }
        }
    }

    /// 自底向上合并条目过少的分支。
    fn purge(&mut self, limits: &QuadtreeLimits) {
        let Content::Branch(children) = &mut self.content else {
            return;
        };
        for child in children.iter_mut() {
            child.purge(limits);
        }
        if !children
            .iter()
            .all(|child| matches!(child.content, Content::Leaf(_)))
        {
            return;
        }
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for child in children.iter() {
            if let Content::Leaf(items) = &child.content {
                for item in items {
                    if seen.insert(*item) {
                        merged.push(*item);
                    }
                }
            }
        }
        if merged.len() < limits.min_occupancy {
            self.content = Content::Leaf(merged);
        }
    }

    fn collect_in_region<F>(
        &self,
        region: &Bounds2D,
        seen: &mut HashSet<T>,
        predicate: &mut F,
        out: &mut Vec<T>,
    ) where
        F: FnMut(T) -> bool,
    {
        if !self.boundary.intersects(region) {
            return;
        }
        match &self.content {
            Content::Leaf(items) => {
                for item in items {
                    if !seen.insert(*item) {
                        continue;
                    }
                    if predicate(*item) {
                        out.push(*item);
                    }
                }
            }
            Content::Branch(children) => {
                for child in children.iter() {
                    child.collect_in_region(region, seen, predicate, out);
                }
            }
        }
    }

    fn count(&self) -> usize {
        match &self.content {
            Content::Leaf(_) => 1,
            Content::Branch(children) => 1 + children.iter().map(Node::count).sum::<usize>(),
        }
    }

    fn height(&self) -> usize {
        match &self.content {
            Content::Leaf(_) => self.depth,
            Content::Branch(children) => {
                children.iter().map(Node::height).max().unwrap_or(self.depth)
            }
        }
    }
}

/// 最优优先搜索的候选节点，按下界距离从小到大出堆。
struct Candidate<'a, T> {
    lower_bound: f64,
    node: &'a Node<T>,
}

impl<T> PartialEq for Candidate<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.lower_bound.total_cmp(&other.lower_bound) == Ordering::Equal
    }
}

impl<T> Eq for Candidate<'_, T> {}

impl<T> PartialOrd for Candidate<'_, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Candidate<'_, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.lower_bound.total_cmp(&self.lower_bound)
    }
}

#[derive(Debug)]
pub struct Quadtree<T> {
    root: Option<Node<T>>,
    entries: HashMap<T, Bounds2D>,
    limits: QuadtreeLimits,
}

impl<T: Copy + Eq + Hash> Default for Quadtree<T> {
    fn default() -> Self {
        Self::new(QuadtreeLimits::default())
    }
}

impl<T: Copy + Eq + Hash> Quadtree<T> {
    pub fn new(limits: QuadtreeLimits) -> Self {
        Self {
            root: None,
            entries: HashMap::new(),
            limits,
        }
    }

    #[inline]
    pub fn limits(&self) -> &QuadtreeLimits {
        &self.limits
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, item: &T) -> bool {
        self.entries.contains_key(item)
    }

    /// 条目登记时的包围盒。
    #[inline]
    pub fn bounds_of(&self, item: &T) -> Option<Bounds2D> {
        self.entries.get(item).copied()
    }

    /// 根节点边界，树从未插入过条目时为 `None`。
    #[inline]
    pub fn boundary(&self) -> Option<Bounds2D> {
        self.root.as_ref().map(|root| root.boundary)
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.entries.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.root.as_ref().map_or(0, Node::count)
    }

    pub fn depth(&self) -> usize {
        self.root.as_ref().map_or(0, Node::height)
    }

    /// 插入条目；已存在时不做任何事并返回 `false`。
    pub fn add_object(&mut self, item: T, bounds: Bounds2D) -> bool {
        if self.entries.contains_key(&item) || bounds.is_empty() || has_nan(&bounds) {
            return false;
        }
        self.entries.insert(item, bounds);

        let current = self.boundary();
        let reference = current.unwrap_or_else(|| {
            let origin = Point2::new(0.0, 0.0);
            Bounds2D::new(origin, origin)
        });
        let extent = finite_extent(&bounds, &reference);
        match current {
            Some(boundary) if boundary.contains_bounds(&extent) => {
                if let Some(root) = self.root.as_mut() {
                    root.insert(item, &bounds, &self.entries, &self.limits);
                }
            }
            Some(mut boundary) => {
                boundary.include_bounds(&extent);
                self.rebuild(grown(&boundary, self.limits.growth_margin));
            }
            None => self.rebuild(grown(&extent, self.limits.growth_margin)),
        }
        true
    }

    /// 删除条目并合并过疏的分支；条目不存在时返回 `false`。
    pub fn del_object(&mut self, item: &T) -> bool {
        let Some(bounds) = self.entries.remove(item) else {
            return false;
        };
        if let Some(root) = self.root.as_mut() {
            root.remove(item, &bounds);
            root.purge(&self.limits);
        }
        true
    }

    /// 条目几何变化后重新登记。
    pub fn move_object(&mut self, item: T, bounds: Bounds2D) -> bool {
        if !self.del_object(&item) {
            return false;
        }
        self.add_object(item, bounds)
    }

    /// 包围盒与 `region` 相交且满足 `predicate` 的所有条目，不重复。
    pub fn get_in_region<F>(&self, region: &Bounds2D, mut predicate: F) -> Vec<T>
    where
        F: FnMut(T) -> bool,
    {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            let mut seen = HashSet::new();
            let mut filter = |item: T| {
                self.entries.get(&item).is_some_and(|b| b.intersects(region)) && predicate(item)
            };
            let probe = clamp_region(region, &root.boundary);
            root.collect_in_region(&probe, &mut seen, &mut filter, &mut out);
        }
        out
    }

    /// 第一个包围盒与 `region` 相交且满足 `predicate` 的条目。
    pub fn find<F>(&self, region: &Bounds2D, mut predicate: F) -> Option<T>
    where
        F: FnMut(T) -> bool,
    {
        let mut found = None;
        self.get_in_region(region, |item| {
            if found.is_none() && predicate(item) {
                found = Some(item);
            }
            false
        });
        found
    }

    /// 距 `(x, y)` 不超过 `tolerance` 的最近条目及其距离。
    ///
    /// 节点按其边界到查询点的距离从小到大展开，当前最优距离之外的节点被剪枝；
    /// 命中距离约为 0 时立即返回。
    pub fn get_closest<F>(&self, x: f64, y: f64, tolerance: f64, mut distance: F) -> Option<(T, f64)>
    where
        F: FnMut(T) -> f64,
    {
        let root = self.root.as_ref()?;
        let query = Point2::new(x, y);
        // 节点下界用投影到根边界内的点计算，保证对无限长条目也不会过度剪枝。
        let probe = clamp_point(query, &root.boundary);
        let mut best: Option<(T, f64)> = None;
        let mut seen = HashSet::new();
        let mut heap = BinaryHeap::new();
        heap.push(Candidate {
            lower_bound: root.boundary.distance_to(probe),
            node: root,
        });

        while let Some(Candidate { lower_bound, node }) = heap.pop() {
            let limit = best.map_or(tolerance, |(_, d)| d);
            if lower_bound > limit {
                break;
            }
            match &node.content {
                Content::Leaf(items) => {
                    for item in items {
                        if !seen.insert(*item) {
                            continue;
                        }
                        let limit = best.map_or(tolerance, |(_, d)| d);
                        let near = self
                            .entries
                            .get(item)
                            .is_some_and(|b| b.distance_to(query) <= limit);
                        if !near {
                            continue;
                        }
                        let d = distance(*item);
                        if d <= tolerance && best.is_none_or(|(_, current)| d < current) {
                            best = Some((*item, d));
                            if d <= EPSILON {
                                return best;
                            }
                        }
                    }
                }
                Content::Branch(children) => {
                    for child in children.iter() {
                        let lower_bound = child.boundary.distance_to(probe);
                        if lower_bound <= limit {
                            heap.push(Candidate {
                                lower_bound,
                                node: child,
                            });
                        }
                    }
                }
            }
        }
        best
    }

    fn rebuild(&mut self, boundary: Bounds2D) {
        let mut root = Node::leaf(boundary, 0);
        for (item, bounds) in &self.entries {
            root.insert(*item, bounds, &self.entries, &self.limits);
        }
        self.root = Some(root);
    }
}

fn has_nan(bounds: &Bounds2D) -> bool {
    [bounds.xmin(), bounds.ymin(), bounds.xmax(), bounds.ymax()]
        .iter()
        .any(|v| v.is_nan())
}

/// 把无限分量替换为参考边界上的值，得到参与根节点扩张判断的有限范围。
fn finite_extent(bounds: &Bounds2D, reference: &Bounds2D) -> Bounds2D {
    let pick = |value: f64, fallback: f64| if value.is_finite() { value } else { fallback };
    Bounds2D::from_coords(
        pick(bounds.xmin(), reference.xmin()),
        pick(bounds.ymin(), reference.ymin()),
        pick(bounds.xmax(), reference.xmax()),
        pick(bounds.ymax(), reference.ymax()),
    )
}

/// 把查询区域压到根边界内（区域完全在外时压到最近的边上）。
/// 只用于节点剪枝，条目本身仍按原区域精确过滤。
fn clamp_region(region: &Bounds2D, boundary: &Bounds2D) -> Bounds2D {
    let lo = clamp_point(region.min(), boundary);
    let hi = clamp_point(region.max(), boundary);
    Bounds2D::new(lo, hi)
}

fn clamp_point(point: Point2, boundary: &Bounds2D) -> Point2 {
    Point2::new(
        point.x().clamp(boundary.xmin(), boundary.xmax()),
        point.y().clamp(boundary.ymin(), boundary.ymax()),
    )
}

fn grown(bounds: &Bounds2D, ratio: f64) -> Bounds2D {
    let extent = bounds.width().max(bounds.height());
    bounds.expanded((extent * ratio).max(1.0))
}
